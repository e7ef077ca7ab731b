//! Shared test fixtures: a scripted mock of the detector's control
//! endpoint, a UDP frame feeder, and a collecting frame sink.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use daq_driver_ultra::{FrameInfo, FrameSink};

const ACK: &str = "ACK\r\n";
const NOT_RECOGNISED: &str = "!Command Not Recognised\r\n";

/// In-process mock of the detector's command endpoint.
///
/// Accepts connections sequentially and answers the text protocol: the
/// empty probe, hex register reads/writes against a live register map,
/// canned analog readings and delay/width pairs, and ACK for sets.
pub struct MockDetector {
    pub port: u16,
    registers: Arc<Mutex<HashMap<String, u32>>>,
}

impl MockDetector {
    pub fn spawn(head_type: u32) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let registers: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(
            [
                ("fpgaxchip", 0),
                ("fpgapwr", 0),
                ("fpgasync", 0),
                ("fpgaadc", 0),
                ("fpgaframe", 0x400),
                ("fpgaerror", 0x2),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        ));

        let server_registers = Arc::clone(&registers);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                serve_connection(stream, head_type, &server_registers);
            }
        });

        Self { port, registers }
    }

    /// Current value of a mock register.
    pub fn register(&self, name: &str) -> u32 {
        *self.registers.lock().unwrap().get(name).unwrap()
    }
}

fn serve_connection(
    mut stream: TcpStream,
    head_type: u32,
    registers: &Arc<Mutex<HashMap<String, u32>>>,
) {
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let line = loop {
            if let Some(pos) = pending.windows(2).position(|w| w == b"\r\n") {
                let line = String::from_utf8_lossy(&pending[..pos]).into_owned();
                pending.drain(..pos + 2);
                break line;
            }
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
            }
        };
        let reply = respond(&line, head_type, registers);
        if stream.write_all(reply.as_bytes()).is_err() {
            return;
        }
    }
}

fn respond(command: &str, head_type: u32, registers: &Arc<Mutex<HashMap<String, u32>>>) -> String {
    if command.is_empty() {
        return NOT_RECOGNISED.to_string();
    }

    if let Some(name) = command.strip_prefix("read ") {
        if name == "eeprom 0x1ff" {
            return format!("{head_type:x}\r\n");
        }
        if let Some(value) = registers.lock().unwrap().get(name) {
            return format!("{value:x}\r\n");
        }
        let canned = match name {
            "coldtemp" => "<3.14",
            "hottemp" => ">44.5",
            "tectemp" => "11.25",
            "tecsup" => "5.02",
            "fpgaaux1" => "10 20",
            "fpgaaux2" => "30 5",
            "fpgarst" => "4 6",
            "fpgas1" => "8 2",
            "fpgas2" => "12 3",
            "fpgaxclk" => "10 8",
            "fpgashift" => "4 1",
            name if name.starts_with("adc") => "0.25",
            _ => return NOT_RECOGNISED.to_string(),
        };
        return format!("{canned}\r\n");
    }

    if let Some(args) = command.strip_prefix("set ") {
        if args == "state" {
            return ACK.to_string();
        }
        let (name, value) = args.split_once(' ').unwrap_or((args, ""));
        let mut registers = registers.lock().unwrap();
        if registers.contains_key(name) {
            match u32::from_str_radix(value, 16) {
                Ok(parsed) => {
                    registers.insert(name.to_string(), parsed);
                    return ACK.to_string();
                }
                Err(_) => return NOT_RECOGNISED.to_string(),
            }
        }
        // Analog DAC sets carry a V suffix; timing pairs are two decimals.
        if value.ends_with('V') || name.starts_with("fpga") {
            return ACK.to_string();
        }
    }

    NOT_RECOGNISED.to_string()
}

/// Send one frame datagram per sequence number to `target`. The payload is
/// filled with the low byte of the frame number so tests can check that
/// the right payload landed in the right buffer.
pub fn send_frames(target: SocketAddr, numbers: &[u32], payload_len: usize) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    for &number in numbers {
        let mut datagram = Vec::with_capacity(payload_len + 6);
        datagram.extend_from_slice(&number.to_be_bytes());
        datagram.extend_from_slice(&[0, 0]);
        datagram.resize(payload_len + 6, number as u8);
        socket.send_to(&datagram, target).unwrap();
    }
}

/// Frame record captured by [`CollectSink`].
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame_index: usize,
    pub frame_number: u32,
    pub payload: Vec<u8>,
}

/// Sink that copies every delivered frame out for inspection, optionally
/// vetoing continuation after a fixed number of deliveries.
pub struct CollectSink {
    scratch: Vec<u8>,
    frames: Arc<Mutex<Vec<CapturedFrame>>>,
    started: Arc<AtomicBool>,
    veto_after: Option<usize>,
}

impl CollectSink {
    pub fn new(payload_len: usize) -> (Self, Arc<Mutex<Vec<CapturedFrame>>>, Arc<AtomicBool>) {
        Self::with_veto_opt(payload_len, None)
    }

    /// Veto continuation once `veto_after` frames have been delivered.
    pub fn with_veto(
        payload_len: usize,
        veto_after: usize,
    ) -> (Self, Arc<Mutex<Vec<CapturedFrame>>>, Arc<AtomicBool>) {
        Self::with_veto_opt(payload_len, Some(veto_after))
    }

    fn with_veto_opt(
        payload_len: usize,
        veto_after: Option<usize>,
    ) -> (Self, Arc<Mutex<Vec<CapturedFrame>>>, Arc<AtomicBool>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let started = Arc::new(AtomicBool::new(false));
        let sink = Self {
            scratch: vec![0; payload_len],
            frames: Arc::clone(&frames),
            started: Arc::clone(&started),
            veto_after,
        };
        (sink, frames, started)
    }
}

impl FrameSink for CollectSink {
    fn acquisition_started(&mut self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn frame_buffer(&mut self, _frame_index: usize) -> &mut [u8] {
        &mut self.scratch
    }

    fn frame_ready(&mut self, info: FrameInfo) -> bool {
        let mut frames = self.frames.lock().unwrap();
        frames.push(CapturedFrame {
            frame_index: info.frame_index,
            frame_number: info.frame_number,
            payload: self.scratch.clone(),
        });
        match self.veto_after {
            Some(limit) => frames.len() < limit,
            None => true,
        }
    }
}

/// Poll `pred` until it holds or five seconds elapse.
pub fn wait_for(mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
