//! Simulated histogram peripheral shared by the integration tests

// Not every test file uses every helper
#![allow(dead_code)]

use histacc_lib::{Command, Driver, DriverConfig};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

pub const END: u8 = 255;

/// Route driver logs to the test harness; set RUST_LOG=trace to see every byte.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Driver settings that keep tests fast: no settle delays, short timeouts.
pub fn fast_config() -> DriverConfig {
    DriverConfig::default()
        .with_settle_unit(Duration::ZERO)
        .with_response_timeout(Duration::from_millis(200))
        .with_drain_quiet(Duration::from_millis(20))
}

/// Behaviour of the simulated peripheral.
#[derive(Debug, Clone)]
pub struct Peripheral {
    /// Bin memory, indexed by bin address.
    pub memory: Vec<u16>,
    pub bin_count: u16,
    pub bin_address: u16,
    /// Bytes left on the line from before the host connected, sent once.
    pub stale: Vec<u8>,
    /// Bytes sent before every acknowledgement.
    pub noise: Vec<u8>,
    /// Stop an upload after this many bytes.
    pub truncate_upload: Option<usize>,
    /// Value sent as the last byte of an upload.
    pub upload_terminator: u8,
}

impl Default for Peripheral {
    fn default() -> Self {
        Self {
            memory: (0..1024u32).map(|i| (i * 0x0101) as u16).collect(),
            bin_count: 512,
            bin_address: 0,
            stale: Vec::new(),
            noise: Vec::new(),
            truncate_upload: None,
            upload_terminator: END,
        }
    }
}

/// Everything the peripheral received, plus its final state.
#[derive(Debug)]
pub struct PeripheralLog {
    pub received: Vec<u8>,
    pub bin_count: u16,
    pub bin_address: u16,
    pub running: bool,
}

impl Peripheral {
    pub fn with_memory(mut self, memory: Vec<u16>) -> Self {
        self.memory = memory;
        self
    }

    /// Spawn the peripheral and hand back the host end of the link.
    pub fn spawn(self) -> (DuplexStream, JoinHandle<PeripheralLog>) {
        let (host, device) = tokio::io::duplex(4096);
        (host, tokio::spawn(self.run(device)))
    }

    async fn run(mut self, mut link: DuplexStream) -> PeripheralLog {
        let mut received = Vec::new();
        let mut running = false;

        if link.write_all(&self.stale).await.is_err() {
            return self.log(received, running);
        }
        // Runs until the host drops its end
        while let Ok(opcode) = link.read_u8().await {
            received.push(opcode);
            let cmd = Command::decode(opcode).expect("host sent an unknown opcode");
            let mut args = Vec::new();
            loop {
                let Ok(byte) = link.read_u8().await else {
                    return self.log(received, running);
                };
                received.push(byte);
                let is_data = matches!(cmd, Command::SetNumBins | Command::SetBinAddr) && args.len() < 2;
                if is_data {
                    args.push(byte);
                } else {
                    assert_eq!(byte, END, "{cmd} not terminated by END_COMMAND");
                    break;
                }
            }

            match cmd {
                Command::StartHist => running = true,
                Command::StopHist => running = false,
                Command::ClearResults => self.memory.iter_mut().for_each(|b| *b = 0),
                Command::SetNumBins => self.bin_count = u16::from_le_bytes([args[0], args[1]]),
                Command::SetBinAddr => self.bin_address = u16::from_le_bytes([args[0], args[1]]),
                Command::StartUpload => {
                    let mut reply = self.upload_bytes();
                    if let Some(limit) = self.truncate_upload {
                        reply.truncate(limit);
                    }
                    if link.write_all(&reply).await.is_err() {
                        return self.log(received, running);
                    }
                    continue;
                }
                Command::EndCommand => panic!("END_COMMAND sent as an opcode"),
            }

            let mut ack = self.noise.clone();
            ack.push(END);
            if link.write_all(&ack).await.is_err() {
                return self.log(received, running);
            }
        }
        self.log(received, running)
    }

    fn upload_bytes(&self) -> Vec<u8> {
        let start = self.bin_address as usize;
        let mut bytes: Vec<u8> = (start..start + self.bin_count as usize)
            .flat_map(|bin| self.memory.get(bin).copied().unwrap_or(0).to_le_bytes())
            .collect();
        bytes.push(self.upload_terminator);
        bytes
    }

    fn log(self, received: Vec<u8>, running: bool) -> PeripheralLog {
        PeripheralLog {
            received,
            bin_count: self.bin_count,
            bin_address: self.bin_address,
            running,
        }
    }
}

/// Drop the driver so the peripheral sees EOF, then collect its log.
pub async fn finish(driver: Driver<DuplexStream>, peripheral: JoinHandle<PeripheralLog>) -> PeripheralLog {
    drop(driver.into_inner());
    peripheral.await.expect("peripheral task panicked")
}
