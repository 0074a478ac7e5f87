/// One chunk of stream bytes pulled by the [`FrameAssembler`](crate::FrameAssembler).
///
/// A frame is either data (possibly shorter than the assembler's capacity
/// when the source had fewer bytes ready) or the end-of-stream sentinel,
/// which carries no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    end_of_stream: bool,
}

impl Frame {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            end_of_stream: false,
        }
    }

    /// Sentinel signaling that the source will yield no further bytes.
    pub fn end_of_stream() -> Self {
        Self {
            data: Vec::new(),
            end_of_stream: true,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Outcome of [`FrameAssembler::pull_exact_frame`](crate::FrameAssembler::pull_exact_frame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExactFrame {
    /// Exactly `capacity` bytes.
    Full(Vec<u8>),
    /// The stream ended before the frame filled; holds every byte collected.
    EndedEarly(Vec<u8>),
}

impl ExactFrame {
    pub fn data(&self) -> &[u8] {
        match self {
            Self::Full(data) | Self::EndedEarly(data) => data,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    pub fn into_data(self) -> Vec<u8> {
        match self {
            Self::Full(data) | Self::EndedEarly(data) => data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_empty() {
        let frame = Frame::end_of_stream();
        assert!(frame.is_end_of_stream());
        assert!(frame.is_empty());
        assert_eq!(frame.len(), 0);
    }

    #[test]
    fn data_frame_keeps_bytes() {
        let frame = Frame::new(vec![1, 2, 3]);
        assert!(!frame.is_end_of_stream());
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.into_data(), vec![1, 2, 3]);
    }

    #[test]
    fn exact_frame_accessors() {
        let full = ExactFrame::Full(vec![0; 4]);
        assert!(full.is_full());
        assert_eq!(full.data().len(), 4);

        let partial = ExactFrame::EndedEarly(vec![9]);
        assert!(!partial.is_full());
        assert_eq!(partial.into_data(), vec![9]);
    }
}
