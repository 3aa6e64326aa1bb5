use serde::{Deserialize, Serialize};

/// Numeric status codes carried in every result/error event.
///
/// The values are part of the wire protocol and mirror the Web Speech API
/// error numbering the client side expects; `Eos` (-1) is the internal
/// utterance-complete acknowledgement and is never forwarded to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Status {
    Eos,
    Success,
    NoSpeech,
    Aborted,
    AudioCapture,
    Network,
    NotAllowed,
    ServiceNotAllowed,
    BadGrammar,
    LanguageNotSupported,
    NotAvailable,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Eos => -1,
            Status::Success => 0,
            Status::NoSpeech => 1,
            Status::Aborted => 2,
            Status::AudioCapture => 3,
            Status::Network => 4,
            Status::NotAllowed => 5,
            Status::ServiceNotAllowed => 6,
            Status::BadGrammar => 7,
            Status::LanguageNotSupported => 8,
            Status::NotAvailable => 9,
        }
    }

    pub fn is_error(self) -> bool {
        !matches!(self, Status::Success | Status::Eos)
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> i32 {
        status.code()
    }
}

impl TryFrom<i32> for Status {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(Status::Eos),
            0 => Ok(Status::Success),
            1 => Ok(Status::NoSpeech),
            2 => Ok(Status::Aborted),
            3 => Ok(Status::AudioCapture),
            4 => Ok(Status::Network),
            5 => Ok(Status::NotAllowed),
            6 => Ok(Status::ServiceNotAllowed),
            7 => Ok(Status::BadGrammar),
            8 => Ok(Status::LanguageNotSupported),
            9 => Ok(Status::NotAvailable),
            other => Err(format!("unknown status code: {other}")),
        }
    }
}
