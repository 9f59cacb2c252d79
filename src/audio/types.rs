use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker role of one interleaved channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    FL,
    FR,
    FC,
    LFE,
    BL,
    BR,
    FLOC,
    FROC,
    BC,
    SL,
    SR,
    TFL,
    TFR,
    TFC,
    TC,
    TBL,
    TBR,
    TBC,
    BLOC,
    BROC,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::FL => "FL",
            Channel::FR => "FR",
            Channel::FC => "FC",
            Channel::LFE => "LFE",
            Channel::BL => "BL",
            Channel::BR => "BR",
            Channel::FLOC => "FLOC",
            Channel::FROC => "FROC",
            Channel::BC => "BC",
            Channel::SL => "SL",
            Channel::SR => "SR",
            Channel::TFL => "TFL",
            Channel::TFR => "TFR",
            Channel::TFC => "TFC",
            Channel::TC => "TC",
            Channel::TBL => "TBL",
            Channel::TBR => "TBR",
            Channel::TBC => "TBC",
            Channel::BLOC => "BLOC",
            Channel::BROC => "BROC",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while building a channel layout
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("Channel layout must contain at least one channel")]
    Empty,

    #[error("Channel {channel} appears more than once in the layout")]
    DuplicateChannel { channel: Channel },
}

/// Ordered set of channel roles; the order is the interleaving order
///
/// The default value is the empty layout, used for stages that have not been
/// initialized yet. Layouts built through [`ChannelLayout::new`] always hold
/// at least one channel and never repeat a role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelLayout {
    channels: Vec<Channel>,
}

impl ChannelLayout {
    pub fn new(channels: Vec<Channel>) -> Result<Self, LayoutError> {
        if channels.is_empty() {
            return Err(LayoutError::Empty);
        }

        for (i, channel) in channels.iter().enumerate() {
            if channels[..i].contains(channel) {
                return Err(LayoutError::DuplicateChannel { channel: *channel });
            }
        }

        Ok(Self { channels })
    }

    fn from_static(channels: &[Channel]) -> Self {
        Self {
            channels: channels.to_vec(),
        }
    }

    pub fn mono() -> Self {
        Self::from_static(&[Channel::FC])
    }

    pub fn stereo() -> Self {
        Self::from_static(&[Channel::FL, Channel::FR])
    }

    pub fn surround_2_1() -> Self {
        Self::from_static(&[Channel::FL, Channel::FR, Channel::LFE])
    }

    pub fn quad() -> Self {
        Self::from_static(&[Channel::FL, Channel::FR, Channel::BL, Channel::BR])
    }

    pub fn surround_5_1() -> Self {
        Self::from_static(&[
            Channel::FL,
            Channel::FR,
            Channel::FC,
            Channel::LFE,
            Channel::BL,
            Channel::BR,
        ])
    }

    pub fn surround_7_1() -> Self {
        Self::from_static(&[
            Channel::FL,
            Channel::FR,
            Channel::FC,
            Channel::LFE,
            Channel::BL,
            Channel::BR,
            Channel::SL,
            Channel::SR,
        ])
    }

    pub fn count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Interleave position of `channel`, if present
    pub fn index_of(&self, channel: Channel) -> Option<usize> {
        self.channels.iter().position(|c| *c == channel)
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        self.index_of(channel).is_some()
    }

    /// True when every role of `other` is present in this layout
    pub fn contains_channels(&self, other: &ChannelLayout) -> bool {
        other.iter().all(|c| self.has_channel(*c))
    }
}

impl std::ops::Index<usize> for ChannelLayout {
    type Output = Channel;

    fn index(&self, index: usize) -> &Channel {
        &self.channels[index]
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, channel) in self.channels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(channel.as_str())?;
        }
        Ok(())
    }
}

/// Sample encodings understood by the stream layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S16,
    /// 24-bit samples packed in 3 bytes
    S24Packed,
    S32,
    F32,
    F64,
    /// IEC 61937 passthrough bursts, carried as 16-bit words
    Iec61937,
}

impl SampleFormat {
    pub fn bits(&self) -> u32 {
        match self {
            SampleFormat::U8 => 8,
            SampleFormat::S16 | SampleFormat::Iec61937 => 16,
            SampleFormat::S24Packed => 24,
            SampleFormat::S32 | SampleFormat::F32 => 32,
            SampleFormat::F64 => 64,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits() >> 3) as usize
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, SampleFormat::Iec61937)
    }
}

/// Format of an interleaved PCM stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    /// Rate of the encoded payload for passthrough formats, otherwise equal to `sample_rate`
    pub encoded_rate: u32,
    pub layout: ChannelLayout,
    pub data_format: SampleFormat,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, layout: ChannelLayout, data_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            encoded_rate: sample_rate,
            layout,
            data_format,
        }
    }

    pub fn with_encoded_rate(mut self, encoded_rate: u32) -> Self {
        self.encoded_rate = encoded_rate;
        self
    }

    /// Bytes per interleaved frame
    pub fn frame_size(&self) -> usize {
        self.data_format.bytes_per_sample() * self.layout.count()
    }

    pub fn channel_count(&self) -> usize {
        self.layout.count()
    }
}
