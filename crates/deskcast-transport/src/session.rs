//! RTMP publisher session.
//!
//! One session owns one network connection to a media server. The
//! lifecycle is `Idle -> Connecting -> Connected -> Closed`; `Closed`
//! is terminal for the instance. Network I/O runs on a tokio runtime
//! owned by the session; frames are handed off through a bounded queue
//! so `push_video_frame` never blocks the caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ClientSession, ClientSessionConfig, ClientSessionEvent, ClientSessionResult,
    PublishRequestType,
};
use rml_rtmp::time::RtmpTimestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::connection::ConnectionState;
use crate::error::TransportError;
use crate::nal::{annex_b_to_avcc, build_avc_decoder_config, build_flv_video_tag, ParameterSet};
use crate::{EncodedFrame, FrameKind, TransportResult, PACKET_CHANNEL_CAPACITY};

/// How long the session runtime gets to wind down on close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Transport statistics for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionStatistics {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
}

/// A publisher session for one RTMP destination.
///
/// All methods take `&self`; the session is designed to be shared via
/// `Arc` between the orchestrator's API surface and the frame pump.
pub struct PublisherSession {
    media_info: Mutex<Option<ParameterSet>>,
    state: Arc<RwLock<ConnectionState>>,
    runtime: Mutex<Option<Runtime>>,
    packet_tx: Mutex<Option<Sender<EncodedFrame>>>,
    should_stop: Arc<AtomicBool>,
    bytes_sent: Arc<AtomicU64>,
    packets_sent: Arc<AtomicU64>,
    packets_dropped: AtomicU64,
}

impl PublisherSession {
    /// Create an idle session.
    pub fn new() -> Self {
        Self {
            media_info: Mutex::new(None),
            state: Arc::new(RwLock::new(ConnectionState::Idle)),
            runtime: Mutex::new(None),
            packet_tx: Mutex::new(None),
            should_stop: Arc::new(AtomicBool::new(false)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            packets_sent: Arc::new(AtomicU64::new(0)),
            packets_dropped: AtomicU64::new(0),
        }
    }

    /// Supply the parameter sets announced in the media description.
    ///
    /// Must be called before [`open`](Self::open).
    pub fn set_media_info(&self, params: ParameterSet) {
        *self.media_info.lock() = Some(params);
    }

    /// Connect to the destination and start publishing.
    ///
    /// Blocks the caller for at most `timeout`. On failure the session
    /// ends up `Closed` and should be discarded; there is no automatic
    /// retry.
    #[instrument(name = "publisher_open", skip(self))]
    pub fn open(&self, url: &str, timeout: Duration) -> TransportResult<()> {
        {
            let mut state = self.state.write();
            match *state {
                ConnectionState::Idle => {}
                ConnectionState::Connecting | ConnectionState::Connected => {
                    return Err(TransportError::AlreadyOpen);
                }
                ConnectionState::Closed => return Err(TransportError::Closed),
            }
            *state = ConnectionState::Connecting;
        }

        let result = self.try_open(url, timeout);
        if result.is_err() {
            *self.state.write() = ConnectionState::Closed;
        }
        result
    }

    fn try_open(&self, url: &str, timeout: Duration) -> TransportResult<()> {
        let media = self
            .media_info
            .lock()
            .clone()
            .ok_or(TransportError::MissingMediaInfo)?;
        let sequence_header = build_avc_decoder_config(&media)
            .ok_or_else(|| TransportError::Connection("malformed SPS".to_string()))?;

        let endpoint = RtmpEndpoint::parse(url)?;
        info!(host = %endpoint.host, app = %endpoint.app, "Connecting to RTMP server");

        let runtime = Runtime::new().map_err(TransportError::Io)?;

        let timeout_ms = timeout.as_millis() as u64;
        let mut connection = runtime.block_on(async {
            match tokio::time::timeout(timeout, connect_rtmp(&endpoint)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout_ms)),
            }
        })?;

        // The decoder configuration record goes out before any frames.
        let header_tag = build_flv_video_tag(&sequence_header, true, true, 0);
        runtime.block_on(send_video(&mut connection, header_tag, 0, true))?;
        debug!("Sent AVC sequence header");

        let (tx, rx): (Sender<EncodedFrame>, Receiver<EncodedFrame>) =
            crossbeam_channel::bounded(PACKET_CHANNEL_CAPACITY);

        self.should_stop.store(false, Ordering::SeqCst);
        runtime.spawn(run_writer(
            connection,
            rx,
            Arc::clone(&self.state),
            Arc::clone(&self.should_stop),
            Arc::clone(&self.bytes_sent),
            Arc::clone(&self.packets_sent),
        ));

        *self.packet_tx.lock() = Some(tx);
        *self.runtime.lock() = Some(runtime);
        *self.state.write() = ConnectionState::Connected;

        info!(url, "RTMP publishing started");
        Ok(())
    }

    /// Queue one encoded frame for publishing.
    ///
    /// Silently drops the frame unless the session is connected, and
    /// when the outgoing queue is full; connection loss is observed via
    /// [`is_connected`](Self::is_connected), never per frame.
    pub fn push_video_frame(&self, frame: EncodedFrame) {
        if !self.is_connected() {
            return;
        }

        let tx = self.packet_tx.lock();
        if let Some(tx) = tx.as_ref() {
            if tx.try_send(frame).is_err() {
                self.packets_dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Publish queue full, frame dropped");
            }
        }
    }

    /// Tear the connection down. Idempotent; the session is `Closed`
    /// afterwards and cannot be reopened.
    #[instrument(name = "publisher_close", skip(self))]
    pub fn close(&self) {
        self.should_stop.store(true, Ordering::SeqCst);

        // Dropping the sender unblocks the writer.
        *self.packet_tx.lock() = None;

        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
            info!("Publisher session closed");
        }

        *self.state.write() = ConnectionState::Closed;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected()
    }

    /// Get transport statistics.
    pub fn statistics(&self) -> SessionStatistics {
        SessionStatistics {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for PublisherSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PublisherSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parsed `rtmp[s]://host[:port]/app/stream` destination.
#[derive(Debug, Clone)]
struct RtmpEndpoint {
    host: String,
    port: u16,
    app: String,
    stream: String,
}

impl RtmpEndpoint {
    fn parse(url: &str) -> TransportResult<Self> {
        if !url.starts_with("rtmp://") && !url.starts_with("rtmps://") {
            return Err(TransportError::InvalidUrl(
                "URL must start with rtmp:// or rtmps://".to_string(),
            ));
        }

        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("missing host".to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(1935);

        let path = parsed.path().trim_start_matches('/');
        let (app, stream) = match path.split_once('/') {
            Some((app, stream)) if !app.is_empty() && !stream.is_empty() => {
                (app.to_string(), stream.to_string())
            }
            _ => {
                return Err(TransportError::InvalidUrl(
                    "path must be /app/stream".to_string(),
                ))
            }
        };

        Ok(Self {
            host,
            port,
            app,
            stream,
        })
    }
}

/// Live RTMP connection with protocol session state.
struct RtmpConnection {
    stream: TcpStream,
    session: ClientSession,
}

/// Connect, handshake, and start publishing on `endpoint`.
///
/// The caller bounds the whole negotiation with a timeout.
async fn connect_rtmp(endpoint: &RtmpEndpoint) -> TransportResult<RtmpConnection> {
    let addr = format!("{}:{}", endpoint.host, endpoint.port);
    let mut stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| TransportError::Connection(format!("TCP connect failed: {}", e)))?;

    debug!("TCP connection established, starting handshake");

    let mut handshake = Handshake::new(PeerType::Client);

    let p0_p1 = handshake
        .generate_outbound_p0_and_p1()
        .map_err(|e| TransportError::Connection(format!("Handshake generation failed: {:?}", e)))?;
    stream
        .write_all(&p0_p1)
        .await
        .map_err(|e| TransportError::Connection(format!("Handshake write failed: {}", e)))?;

    let mut buf = vec![0u8; 4096];
    let leftover = loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| TransportError::Connection(format!("Handshake read failed: {}", e)))?;
        if n == 0 {
            return Err(TransportError::Connection(
                "connection closed during handshake".to_string(),
            ));
        }

        match handshake.process_bytes(&buf[..n]) {
            Ok(HandshakeProcessResult::InProgress { response_bytes }) => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await.map_err(|e| {
                        TransportError::Connection(format!("Handshake write failed: {}", e))
                    })?;
                }
            }
            Ok(HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            }) => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await.map_err(|e| {
                        TransportError::Connection(format!("Handshake write failed: {}", e))
                    })?;
                }
                break remaining_bytes;
            }
            Err(e) => {
                return Err(TransportError::Connection(format!(
                    "Handshake failed: {:?}",
                    e
                )));
            }
        }
    };

    debug!("Handshake complete, creating RTMP session");

    let config = ClientSessionConfig::new();
    let (mut session, initial_results) = ClientSession::new(config)
        .map_err(|e| TransportError::Connection(format!("Session creation failed: {:?}", e)))?;

    for result in initial_results {
        if let ClientSessionResult::OutboundResponse(packet) = result {
            stream
                .write_all(&packet.bytes)
                .await
                .map_err(TransportError::Io)?;
        }
    }

    if !leftover.is_empty() {
        let _ = session.handle_input(&leftover);
    }

    // Connect to the application.
    debug!(app = %endpoint.app, "Requesting RTMP connection");
    let connect_result = session
        .request_connection(endpoint.app.clone())
        .map_err(|e| TransportError::Connection(format!("Connection request failed: {:?}", e)))?;
    if let ClientSessionResult::OutboundResponse(packet) = connect_result {
        stream
            .write_all(&packet.bytes)
            .await
            .map_err(TransportError::Io)?;
    }

    wait_for_event(&mut stream, &mut session, &mut buf, |event| match event {
        ClientSessionEvent::ConnectionRequestAccepted => Some(Ok(())),
        ClientSessionEvent::ConnectionRequestRejected { description } => Some(Err(
            TransportError::Connection(format!("connection rejected: {}", description)),
        )),
        _ => None,
    })
    .await?;

    // Start publishing on the stream key.
    debug!(stream = %endpoint.stream, "Requesting publish");
    let publish_result = session
        .request_publishing(endpoint.stream.clone(), PublishRequestType::Live)
        .map_err(|e| TransportError::Connection(format!("Publish request failed: {:?}", e)))?;
    if let ClientSessionResult::OutboundResponse(packet) = publish_result {
        stream
            .write_all(&packet.bytes)
            .await
            .map_err(TransportError::Io)?;
    }

    wait_for_event(&mut stream, &mut session, &mut buf, |event| match event {
        ClientSessionEvent::PublishRequestAccepted => Some(Ok(())),
        _ => None,
    })
    .await?;

    info!("RTMP connection established and publishing accepted");

    Ok(RtmpConnection { stream, session })
}

/// Drive the session until `check` resolves one of its raised events.
async fn wait_for_event<F>(
    stream: &mut TcpStream,
    session: &mut ClientSession,
    buf: &mut [u8],
    check: F,
) -> TransportResult<()>
where
    F: Fn(&ClientSessionEvent) -> Option<TransportResult<()>>,
{
    loop {
        let n = stream.read(buf).await.map_err(TransportError::Io)?;
        if n == 0 {
            return Err(TransportError::Connection("connection closed".to_string()));
        }

        let results = session
            .handle_input(&buf[..n])
            .map_err(|e| TransportError::Connection(format!("Session input error: {:?}", e)))?;

        for result in results {
            match result {
                ClientSessionResult::OutboundResponse(packet) => {
                    stream
                        .write_all(&packet.bytes)
                        .await
                        .map_err(TransportError::Io)?;
                }
                ClientSessionResult::RaisedEvent(event) => {
                    if let Some(outcome) = check(&event) {
                        return outcome;
                    }
                    trace!("Ignoring event: {:?}", event);
                }
                _ => {}
            }
        }
    }
}

/// Publish one FLV video tag through the session.
async fn send_video(
    connection: &mut RtmpConnection,
    tag: Bytes,
    timestamp_ms: u32,
    is_keyframe: bool,
) -> TransportResult<()> {
    let result = connection
        .session
        .publish_video_data(tag, RtmpTimestamp::new(timestamp_ms), !is_keyframe)
        .map_err(|e| TransportError::Send(format!("publish failed: {:?}", e)))?;

    if let ClientSessionResult::OutboundResponse(packet) = result {
        connection
            .stream
            .write_all(&packet.bytes)
            .await
            .map_err(TransportError::Io)?;
    }

    Ok(())
}

/// Writer task: drains the frame queue into the connection until the
/// session stops or the connection drops.
async fn run_writer(
    mut connection: RtmpConnection,
    rx: Receiver<EncodedFrame>,
    state: Arc<RwLock<ConnectionState>>,
    should_stop: Arc<AtomicBool>,
    bytes_sent: Arc<AtomicU64>,
    packets_sent: Arc<AtomicU64>,
) {
    debug!("Publisher writer started");

    loop {
        if should_stop.load(Ordering::SeqCst) {
            break;
        }

        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(frame) => {
                let avcc = annex_b_to_avcc(&frame.payload);
                let is_keyframe = frame.kind == FrameKind::Key;
                let tag = build_flv_video_tag(&avcc, is_keyframe, false, 0);
                let tag_len = tag.len() as u64;

                if let Err(e) = send_video(&mut connection, tag, frame.timestamp_ms, is_keyframe).await
                {
                    warn!("Send error, closing session: {}", e);
                    *state.write() = ConnectionState::Closed;
                    break;
                }

                bytes_sent.fetch_add(tag_len, Ordering::Relaxed);
                packets_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("Publisher writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parse_full() {
        let ep = RtmpEndpoint::parse("rtmp://media.example.com:2935/live/test").unwrap();
        assert_eq!(ep.host, "media.example.com");
        assert_eq!(ep.port, 2935);
        assert_eq!(ep.app, "live");
        assert_eq!(ep.stream, "test");
    }

    #[test]
    fn endpoint_parse_default_port() {
        let ep = RtmpEndpoint::parse("rtmp://host/live/key").unwrap();
        assert_eq!(ep.port, 1935);
    }

    #[test]
    fn endpoint_parse_rejects_bad_urls() {
        assert!(RtmpEndpoint::parse("http://host/live/key").is_err());
        assert!(RtmpEndpoint::parse("rtmp://host/onlyapp").is_err());
        assert!(RtmpEndpoint::parse("rtmp:///live/key").is_err());
    }

    #[test]
    fn open_requires_media_info() {
        let session = PublisherSession::new();
        let err = session
            .open("rtmp://127.0.0.1/live/test", Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, TransportError::MissingMediaInfo));
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[test]
    fn closed_session_cannot_reopen() {
        let session = PublisherSession::new();
        session.close();
        let err = session
            .open("rtmp://127.0.0.1/live/test", Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn push_on_idle_session_is_dropped() {
        let session = PublisherSession::new();
        session.push_video_frame(EncodedFrame {
            payload: Bytes::from_static(&[0x65]),
            kind: FrameKind::Key,
            timestamp_ms: 0,
        });
        assert_eq!(session.statistics().packets_sent, 0);
    }
}
