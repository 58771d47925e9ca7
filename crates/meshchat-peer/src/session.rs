use std::collections::HashMap;

use meshchat_shared::constants::{FILE_CHANNEL_LABEL, TEXT_CHANNEL_LABEL};
use rand::Rng;
use tracing::warn;

use crate::negotiator::Negotiator;
use crate::transfer::{ChunkProducer, InboundTransfer};
use crate::transport::{ChannelData, ChannelId, PeerTransport};

/// What a `file` sub-channel is used for on this side.
#[derive(Debug)]
pub enum FileChannel {
    /// We requested `filename` and receive its chunks here.
    Download(String),
    /// Opened by the peer; waiting for its `{filename}` request.
    AwaitingRequest,
    /// Streaming one of our shared files to the peer.
    Upload(ChunkProducer),
}

/// Result of one pump turn for a single upload.
#[derive(Debug, PartialEq, Eq)]
pub enum PumpOutcome {
    Sent,
    Finished,
    Failed(String),
}

/// Everything this client holds for one remote participant.
pub struct PeerSession<T> {
    remote: String,
    pub negotiator: Negotiator,
    pub transport: T,
    color: String,
    text_channel: Option<ChannelId>,
    text_open: bool,
    file_channels: HashMap<ChannelId, FileChannel>,
    /// Inbound transfers keyed by filename.
    downloads: HashMap<String, InboundTransfer>,
}

impl<T: PeerTransport> PeerSession<T> {
    pub fn new(negotiator: Negotiator, transport: T) -> Self {
        Self {
            remote: negotiator.remote().to_string(),
            negotiator,
            transport,
            color: random_color(),
            text_channel: None,
            text_open: false,
            file_channels: HashMap::new(),
            downloads: HashMap::new(),
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    /// Text channel id, if one was opened by either side.
    pub fn text_channel(&self) -> Option<ChannelId> {
        self.text_channel
    }

    pub fn open_text_channel(&self) -> Option<ChannelId> {
        self.text_channel.filter(|_| self.text_open)
    }

    /// Ask the transport for the `text` channel.
    pub fn request_text_channel(&mut self) -> Result<ChannelId, crate::error::TransportError> {
        let channel = self.transport.open_channel(TEXT_CHANNEL_LABEL)?;
        self.text_channel = Some(channel);
        Ok(channel)
    }

    /// Record an opened channel. Returns the label's role for the caller.
    pub fn channel_opened(&mut self, channel: ChannelId, label: &str) -> OpenedChannel {
        if self.text_channel == Some(channel) {
            self.text_open = true;
            return OpenedChannel::Text;
        }
        if let Some(FileChannel::Download(filename)) = self.file_channels.get(&channel) {
            return OpenedChannel::Download(filename.clone());
        }
        if self.file_channels.contains_key(&channel) {
            return OpenedChannel::Ignored;
        }

        match label {
            TEXT_CHANNEL_LABEL if self.text_channel.is_none() => {
                self.text_channel = Some(channel);
                self.text_open = true;
                OpenedChannel::Text
            }
            FILE_CHANNEL_LABEL => {
                self.file_channels
                    .insert(channel, FileChannel::AwaitingRequest);
                OpenedChannel::AwaitingRequest
            }
            _ => OpenedChannel::Ignored,
        }
    }

    pub fn is_text_channel(&self, channel: ChannelId) -> bool {
        self.text_channel == Some(channel)
    }

    pub fn file_channel(&self, channel: ChannelId) -> Option<&FileChannel> {
        self.file_channels.get(&channel)
    }

    pub fn has_download(&self, filename: &str) -> bool {
        self.downloads.contains_key(filename)
    }

    pub fn start_download(
        &mut self,
        channel: ChannelId,
        filename: &str,
        declared_size: Option<u64>,
        mime: Option<String>,
    ) {
        self.file_channels
            .insert(channel, FileChannel::Download(filename.to_string()));
        self.downloads.insert(
            filename.to_string(),
            InboundTransfer::new(filename, declared_size).with_mime(mime),
        );
    }

    pub fn download_mut(&mut self, filename: &str) -> Option<&mut InboundTransfer> {
        self.downloads.get_mut(filename)
    }

    pub fn start_upload(&mut self, channel: ChannelId, producer: ChunkProducer) {
        self.file_channels
            .insert(channel, FileChannel::Upload(producer));
    }

    /// Forget a file channel; returns the inbound transfer it carried.
    pub fn remove_file_channel(&mut self, channel: ChannelId) -> Option<InboundTransfer> {
        match self.file_channels.remove(&channel)? {
            FileChannel::Download(filename) => self.downloads.remove(&filename),
            FileChannel::AwaitingRequest | FileChannel::Upload(_) => None,
        }
    }

    pub fn has_pending_chunks(&self) -> bool {
        self.file_channels
            .values()
            .any(|c| matches!(c, FileChannel::Upload(_)))
    }

    /// Send at most one chunk per upload. Finished uploads are closed and
    /// forgotten; failed ones are dropped.
    pub fn pump_uploads(&mut self) -> Vec<(ChannelId, PumpOutcome)> {
        let mut outcomes = Vec::new();

        for (channel, entry) in self.file_channels.iter_mut() {
            let FileChannel::Upload(producer) = entry else {
                continue;
            };
            let outcome = match producer.next() {
                Some(chunk) => match self.transport.send(*channel, ChannelData::Binary(chunk)) {
                    Ok(()) if producer.is_finished() => PumpOutcome::Finished,
                    Ok(()) => PumpOutcome::Sent,
                    Err(e) => PumpOutcome::Failed(e.to_string()),
                },
                None => PumpOutcome::Finished,
            };
            outcomes.push((*channel, outcome));
        }

        for (channel, outcome) in &outcomes {
            match outcome {
                PumpOutcome::Sent => {}
                PumpOutcome::Finished => {
                    self.file_channels.remove(channel);
                    self.transport.close_channel(*channel);
                }
                PumpOutcome::Failed(reason) => {
                    warn!(peer = %self.remote, channel = %channel, %reason, "Upload failed");
                    self.file_channels.remove(channel);
                    self.transport.close_channel(*channel);
                }
            }
        }

        outcomes
    }

    /// Close every channel and the transport. Returns the filenames of
    /// downloads that were still in flight.
    pub fn close(&mut self) -> Vec<String> {
        let channels: Vec<ChannelId> = self
            .file_channels
            .keys()
            .copied()
            .chain(self.text_channel)
            .collect();
        for channel in channels {
            self.transport.close_channel(channel);
        }
        self.transport.close();
        self.negotiator.close();

        self.file_channels.clear();
        self.text_channel = None;
        self.text_open = false;
        let mut aborted: Vec<String> = self.downloads.drain().map(|(name, _)| name).collect();
        aborted.sort();
        aborted
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum OpenedChannel {
    Text,
    /// Our requested channel is open; send the request for this file.
    Download(String),
    AwaitingRequest,
    Ignored,
}

fn random_color() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "#{:02x}{:02x}{:02x}",
        rng.gen::<u8>(),
        rng.gen::<u8>(),
        rng.gen::<u8>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackNetwork;
    use crate::transport::TransportConnector;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    #[test]
    fn test_random_color_format() {
        let color = random_color();
        assert_eq!(color.len(), 7);
        assert!(color.starts_with('#'));
        assert!(color[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_remote_opened_channels() {
        let network = LoopbackNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = network.connector("bob").connect("alice", tx).unwrap();
        let mut session = PeerSession::new(Negotiator::responder("bob", "alice"), transport);

        assert_eq!(session.open_text_channel(), None);
        assert_eq!(session.channel_opened(ChannelId(1), "text"), OpenedChannel::Text);
        assert_eq!(session.open_text_channel(), Some(ChannelId(1)));

        assert_eq!(
            session.channel_opened(ChannelId(2), "file"),
            OpenedChannel::AwaitingRequest
        );
        assert_eq!(
            session.channel_opened(ChannelId(3), "video"),
            OpenedChannel::Ignored
        );
    }

    #[test]
    fn test_close_reports_inflight_downloads() {
        let network = LoopbackNetwork::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = network.connector("bob").connect("alice", tx).unwrap();
        let mut session = PeerSession::new(Negotiator::initiator("bob", "alice"), transport);

        session.start_download(ChannelId(7), "b.txt", Some(3), None);
        session.start_download(ChannelId(8), "a.txt", None, Some("text/plain".into()));
        session.start_upload(ChannelId(9), ChunkProducer::new("c", Bytes::from_static(b"c")));
        assert!(session.has_pending_chunks());

        assert_eq!(session.close(), vec!["a.txt".to_string(), "b.txt".to_string()]);
        assert!(!session.has_pending_chunks());
        assert!(!network.has_endpoint("bob", "alice"));
    }
}
