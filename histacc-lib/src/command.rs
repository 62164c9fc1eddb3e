use crate::error::HistError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display, IntoStaticStr};

/// Single-byte opcodes understood by the histogram peripheral.
///
/// `EndCommand` doubles as the terminator of every outbound command and as the
/// acknowledgement the peripheral sends back for everything except uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    #[strum(to_string = "END_COMMAND")]
    EndCommand = 255,
    #[strum(to_string = "START_HIST")]
    StartHist = 2,
    #[strum(to_string = "STOP_HIST")]
    StopHist = 3,
    #[strum(to_string = "CLEAR_RESULTS")]
    ClearResults = 4,
    #[strum(to_string = "START_UPLOAD")]
    StartUpload = 5,
    #[strum(to_string = "SET_BINADDR")]
    SetBinAddr = 6,
    #[strum(to_string = "SET_NUMBINS")]
    SetNumBins = 7,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::EndCommand,
        Command::StartHist,
        Command::StopHist,
        Command::ClearResults,
        Command::StartUpload,
        Command::SetBinAddr,
        Command::SetNumBins,
    ];

    pub fn encode(self) -> u8 {
        self.into()
    }

    pub fn decode(byte: u8) -> Option<Self> {
        Self::try_from(byte).ok()
    }

    /// Like [`Command::decode`], but an out-of-vocabulary byte is an error.
    pub fn parse(byte: u8) -> Result<Self, HistError> {
        Self::try_from(byte).map_err(|e| HistError::UnknownCommand(e.number))
    }

    pub fn is_terminator(byte: u8) -> bool {
        byte == Command::EndCommand.encode()
    }
}
