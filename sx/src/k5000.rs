//! Kawai K5000 device profile
//!
//! Every K5000 dump reply starts with the same family of headers:
//!
//! ```text
//! F0 40 <channel> <function> 00 0A <area selector...>
//!  │  │                       │  └─ machine id (K5000)
//!  │  └─ Kawai manufacturer   └──── group
//!  └─ sysex start
//! ```
//!
//! `function` is `0x20` for a one-patch dump and `0x21` for a block dump.
//! The matching requests use `0x00` and `0x01`.

use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;

use crate::matcher::{HeaderPattern, ResponseTable, SYSEX_END, SYSEX_START};

/// Kawai manufacturer id
pub const KAWAI_ID: u8 = 0x40;

const GROUP: u8 = 0x00;
const MACHINE_K5000: u8 = 0x0A;

/// Offset of the first area-selector byte in requests and replies
const SELECTOR_OFFSET: usize = 6;

/// Errors in K5000 profile values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("Invalid sysex channel {0} (expected 0-15)")]
    InvalidChannel(u8),

    #[error("Invalid patch number {0} (expected 0-127)")]
    InvalidPatch(u8),
}

/// K5000 sysex channel (0-15)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Channel(u8);

impl Channel {
    pub const MAX: u8 = 15;

    pub fn new(channel: u8) -> Result<Self, ProfileError> {
        if channel > Self::MAX {
            return Err(ProfileError::InvalidChannel(channel));
        }
        Ok(Self(channel))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Channel {
    type Error = ProfileError;

    fn try_from(channel: u8) -> Result<Self, Self::Error> {
        Self::new(channel)
    }
}

/// One-patch or whole-bank dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DumpKind {
    One,
    Block,
}

impl DumpKind {
    /// Function byte the device answers with
    pub fn response_function(self) -> u8 {
        match self {
            DumpKind::One => 0x20,
            DumpKind::Block => 0x21,
        }
    }

    /// Function byte used to ask for the dump
    pub fn request_function(self) -> u8 {
        match self {
            DumpKind::One => 0x00,
            DumpKind::Block => 0x01,
        }
    }

    fn from_request_function(function: u8) -> Option<Self> {
        match function {
            0x00 => Some(DumpKind::One),
            0x01 => Some(DumpKind::Block),
            _ => None,
        }
    }
}

/// K5000 memory area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryArea {
    /// Single area A
    SingleA,
    /// Single area B (PCM)
    SinglePcmB,
    /// Drum kit (block) / drum instrument area U (one)
    Drum,
    /// Combination area C
    CombiC,
    SingleD,
    SingleE,
    SingleF,
}

impl MemoryArea {
    pub const ALL: [MemoryArea; 7] = [
        MemoryArea::SingleA,
        MemoryArea::SinglePcmB,
        MemoryArea::Drum,
        MemoryArea::CombiC,
        MemoryArea::SingleD,
        MemoryArea::SingleE,
        MemoryArea::SingleF,
    ];

    /// Area-selector bytes following the machine id
    pub fn selector(self) -> &'static [u8] {
        match self {
            MemoryArea::SingleA => &[0x00, 0x00],
            MemoryArea::SinglePcmB => &[0x00, 0x01],
            MemoryArea::Drum => &[0x11],
            MemoryArea::CombiC => &[0x20],
            MemoryArea::SingleD => &[0x00, 0x02],
            MemoryArea::SingleE => &[0x00, 0x03],
            MemoryArea::SingleF => &[0x00, 0x04],
        }
    }
}

/// Human-readable name of a reply header
pub fn response_label(dump: DumpKind, area: MemoryArea) -> &'static str {
    match (dump, area) {
        (DumpKind::One, MemoryArea::SingleA) => "single-a",
        (DumpKind::Block, MemoryArea::SingleA) => "block-a",
        (DumpKind::One, MemoryArea::SinglePcmB) => "single-pcm-b",
        (DumpKind::Block, MemoryArea::SinglePcmB) => "block-pcm-b",
        (DumpKind::One, MemoryArea::Drum) => "drum-inst-u",
        (DumpKind::Block, MemoryArea::Drum) => "drum-kit-b117",
        (DumpKind::One, MemoryArea::CombiC) => "single-combi-c",
        (DumpKind::Block, MemoryArea::CombiC) => "block-combi-c",
        (DumpKind::One, MemoryArea::SingleD) => "single-d",
        (DumpKind::Block, MemoryArea::SingleD) => "block-d",
        (DumpKind::One, MemoryArea::SingleE) => "single-e",
        (DumpKind::Block, MemoryArea::SingleE) => "block-e",
        (DumpKind::One, MemoryArea::SingleF) => "single-f",
        (DumpKind::Block, MemoryArea::SingleF) => "block-f",
    }
}

/// Match priority of the reply headers
const RESPONSE_ORDER: [(DumpKind, MemoryArea); 14] = [
    (DumpKind::One, MemoryArea::SingleA),
    (DumpKind::Block, MemoryArea::SingleA),
    (DumpKind::Block, MemoryArea::SinglePcmB),
    (DumpKind::One, MemoryArea::SinglePcmB),
    (DumpKind::Block, MemoryArea::Drum),
    (DumpKind::One, MemoryArea::Drum),
    (DumpKind::Block, MemoryArea::CombiC),
    (DumpKind::One, MemoryArea::CombiC),
    (DumpKind::Block, MemoryArea::SingleD),
    (DumpKind::One, MemoryArea::SingleD),
    (DumpKind::Block, MemoryArea::SingleE),
    (DumpKind::One, MemoryArea::SingleE),
    (DumpKind::Block, MemoryArea::SingleF),
    (DumpKind::One, MemoryArea::SingleF),
];

fn header(channel: Channel, function: u8, area: MemoryArea) -> Vec<u8> {
    let mut bytes = vec![SYSEX_START, KAWAI_ID, channel.get(), function, GROUP, MACHINE_K5000];
    bytes.extend_from_slice(area.selector());
    bytes
}

/// Header the device answers a `dump` request for `area` with
pub fn response_header(channel: Channel, dump: DumpKind, area: MemoryArea) -> HeaderPattern {
    HeaderPattern::new(
        response_label(dump, area),
        header(channel, dump.response_function(), area),
    )
}

/// Every K5000 reply header for `channel`, in match priority order
pub fn response_table(channel: Channel) -> ResponseTable {
    ResponseTable::new(
        RESPONSE_ORDER
            .iter()
            .map(|&(dump, area)| response_header(channel, dump, area))
            .collect(),
    )
}

/// A dump request addressed to one K5000
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DumpRequest {
    channel: Channel,
    dump: DumpKind,
    area: MemoryArea,
    /// Patch number; only sent for one-patch dumps
    number: u8,
}

impl DumpRequest {
    /// Highest patch number a one-patch request can carry (7-bit data byte)
    pub const MAX_PATCH: u8 = 0x7F;

    pub fn one(channel: Channel, area: MemoryArea, number: u8) -> Result<Self, ProfileError> {
        if number > Self::MAX_PATCH {
            return Err(ProfileError::InvalidPatch(number));
        }
        Ok(Self {
            channel,
            dump: DumpKind::One,
            area,
            number,
        })
    }

    pub fn block(channel: Channel, area: MemoryArea) -> Self {
        Self {
            channel,
            dump: DumpKind::Block,
            area,
            number: 0,
        }
    }

    /// Encode as a complete sysex frame
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = header(self.channel, self.dump.request_function(), self.area);
        if self.dump == DumpKind::One {
            bytes.push(self.number);
        }
        bytes.push(SYSEX_END);
        bytes
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn dump(&self) -> DumpKind {
        self.dump
    }

    pub fn area(&self) -> MemoryArea {
        self.area
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    /// Header of the reply this request should produce
    pub fn response_header(&self) -> HeaderPattern {
        response_header(self.channel, self.dump, self.area)
    }

    /// Decode a request frame; anything that is not a K5000 dump request yields `None`
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() <= SELECTOR_OFFSET || frame[0] != SYSEX_START || frame[1] != KAWAI_ID {
            return None;
        }
        if frame[4] != GROUP || frame[5] != MACHINE_K5000 {
            return None;
        }
        let channel = Channel::new(frame[2]).ok()?;
        let dump = DumpKind::from_request_function(frame[3])?;

        let rest = &frame[SELECTOR_OFFSET..];
        let area = MemoryArea::ALL
            .into_iter()
            .find(|area| rest.starts_with(area.selector()))?;
        let rest = &rest[area.selector().len()..];

        let number = match dump {
            DumpKind::One => match rest {
                [number, SYSEX_END, ..] if *number <= Self::MAX_PATCH => *number,
                _ => return None,
            },
            DumpKind::Block => 0,
        };

        Some(Self {
            channel,
            dump,
            area,
            number,
        })
    }
}
