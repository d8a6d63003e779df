//! Channel-based sink for cross-thread consumers.

use crossbeam_channel::{Sender, TrySendError};
use tracing::warn;

use super::SampleSink;
use crate::error::{Result, RetroError};
use crate::media::{EncodedSample, SampleInfo};

/// Sink that copies each sample onto a crossbeam channel.
///
/// The receiver always gets an owned [`EncodedSample`]; pool storage never
/// leaves the capture thread.
///
/// By default a full channel blocks the capture thread until the consumer
/// catches up. With [`lossy`](ChannelSink::lossy), samples that do not fit
/// are dropped with a warning instead.
pub struct ChannelSink {
    name: String,
    tx: Sender<EncodedSample>,
    lossy: bool,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: Sender<EncodedSample>) -> Self {
        Self {
            name: "channel".to_string(),
            tx,
            lossy: false,
            dropped: 0,
        }
    }

    /// Drop samples instead of blocking when the channel is full.
    pub fn lossy(mut self) -> Self {
        self.lossy = true;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Samples dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl SampleSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, payload: &[u8], info: &SampleInfo) -> Result<()> {
        let sample = EncodedSample::copy_from(payload, info);

        if !self.lossy {
            return self
                .tx
                .send(sample)
                .map_err(|_| RetroError::sink(&self.name, "receiver dropped"));
        }

        match self.tx.try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!(
                    "Sink '{}' channel full, dropped sample pts={}",
                    self.name, info.presentation_time_us
                );
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(RetroError::sink(&self.name, "receiver dropped"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SampleFlags;
    use crossbeam_channel::bounded;

    #[test]
    fn test_channel_sink_sends_copy() {
        let (tx, rx) = bounded(4);
        let mut sink = ChannelSink::new(tx);

        let info = SampleInfo::new(0, 3, 500, SampleFlags::KEYFRAME);
        sink.process(&[7, 8, 9], &info).unwrap();

        let received = rx.try_recv().unwrap();
        assert_eq!(received.data, vec![7, 8, 9]);
        assert_eq!(received.info, info);
    }

    #[test]
    fn test_disconnected_receiver_is_sink_error() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let mut sink = ChannelSink::new(tx).with_name("preview");

        let err = sink.process(&[1], &SampleInfo::default()).unwrap_err();
        assert!(matches!(err, RetroError::Sink { ref sink, .. } if sink == "preview"));
    }

    #[test]
    fn test_lossy_sink_drops_when_full() {
        let (tx, rx) = bounded(1);
        let mut sink = ChannelSink::new(tx).lossy();

        sink.process(&[1], &SampleInfo::default()).unwrap();
        sink.process(&[2], &SampleInfo::default()).unwrap();

        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().data, vec![1]);
        assert!(rx.try_recv().is_err());
    }
}
