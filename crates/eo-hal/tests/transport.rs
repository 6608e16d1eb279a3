//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport driver behaviour against scripted hardware."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eo_hal::{
    BridgeUart, DirectSerial, HalError, OutputLine, OverrunCounter, RegisterBus, SerialLink,
    Transport,
};

#[derive(Clone, Default)]
struct LineLog(Arc<Mutex<Vec<&'static str>>>);

impl OutputLine for LineLog {
    fn set_high(&mut self) -> eo_hal::Result<()> {
        self.0.lock().unwrap().push("high");
        Ok(())
    }

    fn set_low(&mut self) -> eo_hal::Result<()> {
        self.0.lock().unwrap().push("low");
        Ok(())
    }
}

/// Minimal bridge chip: answers RXLVL/LSR reads and drains a pending FIFO.
#[derive(Clone, Default)]
struct FakeBridge {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    fifo: Arc<Mutex<VecDeque<u8>>>,
    lsr: Arc<Mutex<u8>>,
}

impl RegisterBus for FakeBridge {
    fn transfer(&mut self, frame: &[u8]) -> eo_hal::Result<Vec<u8>> {
        self.frames.lock().unwrap().push(frame.to_vec());
        let mut reply = vec![0u8; frame.len()];
        match frame[0] {
            // RXLVL read
            0xC8 => reply[1] = self.fifo.lock().unwrap().len() as u8,
            // LSR read
            0xA8 => reply[1] = *self.lsr.lock().unwrap(),
            // FIFO read
            0x80 => {
                let mut fifo = self.fifo.lock().unwrap();
                for slot in reply.iter_mut().skip(1) {
                    *slot = fifo.pop_front().unwrap_or(0);
                }
            }
            _ => {}
        }
        Ok(reply)
    }
}

#[derive(Clone, Default)]
struct FakeSerial {
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    clears: Arc<Mutex<usize>>,
    input: Arc<Mutex<VecDeque<u8>>>,
}

impl SerialLink for FakeSerial {
    fn write_all(&mut self, bytes: &[u8]) -> eo_hal::Result<()> {
        self.written.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn bytes_to_read(&mut self) -> eo_hal::Result<usize> {
        Ok(self.input.lock().unwrap().len())
    }

    fn read(&mut self, buf: &mut [u8]) -> eo_hal::Result<usize> {
        let mut input = self.input.lock().unwrap();
        let mut n = 0;
        while n < buf.len() {
            match input.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn clear_buffers(&mut self) -> eo_hal::Result<()> {
        *self.clears.lock().unwrap() += 1;
        self.input.lock().unwrap().clear();
        Ok(())
    }
}

#[test]
fn bridge_reset_pulses_line_and_programs_registers() {
    let bus = FakeBridge::default();
    let line = LineLog::default();
    let mut uart = BridgeUart::new(
        Box::new(bus.clone()),
        Box::new(line.clone()),
        OverrunCounter::default(),
    );
    uart.reset().unwrap();

    assert_eq!(*line.0.lock().unwrap(), vec!["low", "high"]);
    let frames = bus.frames.lock().unwrap();
    let expected: Vec<Vec<u8>> = vec![
        vec![0x18, 0x80],
        vec![0x00, 0x01],
        vec![0x08, 0x00],
        vec![0x18, 0xBF],
        vec![0x10, 0x00],
        vec![0x18, 0x03],
        vec![0x10, 0x07],
        vec![0x78, 0x30],
    ];
    assert_eq!(*frames, expected);
}

#[test]
fn bridge_transmit_resets_fifos_then_writes_terminated_frame() {
    let bus = FakeBridge::default();
    let mut uart = BridgeUart::new(
        Box::new(bus.clone()),
        Box::new(LineLog::default()),
        OverrunCounter::default(),
    );
    uart.reset().unwrap();
    bus.frames.lock().unwrap().clear();

    uart.transmit(b"+15C").unwrap();
    let frames = bus.frames.lock().unwrap();
    assert_eq!(frames[0], vec![0x10, 0x07]);
    assert_eq!(frames[1], vec![0x00, b'+', b'1', b'5', b'C', 0x0D]);
}

#[test]
fn bridge_receive_collects_pending_bytes() {
    let bus = FakeBridge::default();
    bus.fifo.lock().unwrap().extend(b"!ABCDEF01".iter().copied());
    let mut uart = BridgeUart::new(
        Box::new(bus.clone()),
        Box::new(LineLog::default()),
        OverrunCounter::default(),
    );
    let reply = uart.receive(Duration::from_millis(200)).unwrap();
    assert_eq!(reply.as_deref(), Some(&b"!ABCDEF01"[..]));
}

#[test]
fn bridge_overrun_discards_reply_and_counts_once() {
    let bus = FakeBridge::default();
    bus.fifo.lock().unwrap().extend(b"!partial".iter().copied());
    *bus.lsr.lock().unwrap() = 0x02;
    let counter = OverrunCounter::default();
    let mut uart = BridgeUart::new(
        Box::new(bus.clone()),
        Box::new(LineLog::default()),
        counter.clone(),
    );
    let result = uart.receive(Duration::from_millis(200));
    assert!(matches!(result, Err(HalError::Overrun)));
    assert_eq!(counter.get(), 1);
    assert_eq!(uart.overruns().get(), 1);
}

#[test]
fn bridge_receive_times_out_with_nothing() {
    let mut uart = BridgeUart::new(
        Box::new(FakeBridge::default()),
        Box::new(LineLog::default()),
        OverrunCounter::default(),
    );
    assert!(uart.receive(Duration::from_millis(20)).unwrap().is_none());
}

#[test]
fn direct_serial_flushes_before_every_transmit() {
    let link = FakeSerial::default();
    let mut transport = DirectSerial::new(Box::new(link.clone()), Box::new(LineLog::default()));
    link.input.lock().unwrap().extend(b"stale".iter().copied());

    transport.transmit(b"+15C").unwrap();
    transport.transmit(b"+15C").unwrap();

    assert_eq!(*link.clears.lock().unwrap(), 2);
    assert!(link.input.lock().unwrap().is_empty());
    assert_eq!(link.written.lock().unwrap()[0], b"+15C\r".to_vec());
}

#[test]
fn direct_serial_receive_returns_collected_bytes() {
    let link = FakeSerial::default();
    let mut transport = DirectSerial::new(Box::new(link.clone()), Box::new(LineLog::default()));
    link.input.lock().unwrap().extend(b"!0123456789\r".iter().copied());
    let reply = transport.receive(Duration::from_millis(200)).unwrap();
    assert_eq!(reply, Some(b"!0123456789\r".to_vec()));
    assert!(transport.receive(Duration::from_millis(10)).unwrap().is_none());
}
