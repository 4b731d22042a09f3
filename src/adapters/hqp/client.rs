//! TCP client for one DSP engine instance (control port 4321).
//!
//! Public calls never touch the socket: they enqueue a request over a
//! bounded channel and the connection task serializes them, one in-flight
//! at a time. That makes ordering and timeout accounting trivial: the
//! server sees requests in submission order and replies are delivered to
//! callers in the same order.
//!
//! Reconnection is lazy. When the socket dies the task drains the queue
//! with `Disconnected` and exits; the next caller's `ensure_connected`
//! performs one connect attempt. There is no background reconnect loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::adapters::hqp::types::{
    DspInfo, DspState, DspStatus, FilterItem, ListItem, MatrixProfile, RateItem, VolumeRange,
};
use crate::adapters::hqp::wire::{self, DocAssembler, ParsedDoc};
use crate::bus::{BusEvent, SharedBus};
use crate::error::BridgeError;

pub const DEFAULT_PORT: u16 = 4321;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
/// Requests queued behind the in-flight one before senders backpressure.
const QUEUE_DEPTH: usize = 32;

/// Connection lifecycle, observable through `conn_state()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    Connected,
    Draining,
    Failed(String),
}

struct Request {
    xml: String,
    reply: oneshot::Sender<Result<ParsedDoc, BridgeError>>,
}

/// Cached per-connection enumerations, rebuilt on each (re)connect.
#[derive(Debug, Clone, Default)]
pub struct Enumerations {
    pub info: Option<DspInfo>,
    pub modes: Vec<ListItem>,
    pub filters: Vec<FilterItem>,
    pub shapers: Vec<ListItem>,
    pub rates: Vec<RateItem>,
    pub volume_range: Option<VolumeRange>,
    pub matrix_profiles: Vec<MatrixProfile>,
}

pub struct HqpClient {
    instance: String,
    target: Option<(String, u16)>,
    tx: Mutex<Option<mpsc::Sender<Request>>>,
    /// Coalesces concurrent connect attempts: one dialer, the rest wait.
    connect_gate: Mutex<()>,
    conn_state: Arc<RwLock<ConnState>>,
    enums: RwLock<Enumerations>,
    bus: SharedBus,
}

impl HqpClient {
    pub fn new(instance: impl Into<String>, target: Option<(String, u16)>, bus: SharedBus) -> Self {
        Self {
            instance: instance.into(),
            target,
            tx: Mutex::new(None),
            connect_gate: Mutex::new(()),
            conn_state: Arc::new(RwLock::new(ConnState::Idle)),
            enums: RwLock::new(Enumerations::default()),
            bus,
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub(crate) fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn is_configured(&self) -> bool {
        self.target.is_some()
    }

    pub fn host(&self) -> Option<&str> {
        self.target.as_ref().map(|(h, _)| h.as_str())
    }

    pub async fn conn_state(&self) -> ConnState {
        self.conn_state.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.conn_state.read().await, ConnState::Connected)
    }

    /// Cached enumerations snapshot (empty until the first connect).
    pub async fn enumerations(&self) -> Enumerations {
        self.enums.read().await.clone()
    }

    /// Close the connection and release the socket. The connection task
    /// drains queued requests with `Disconnected` on its way out.
    pub async fn disconnect(&self) {
        let _ = self.tx.lock().await.take();
    }

    // =========================================================================
    // Connection management
    // =========================================================================

    async fn live_sender(&self) -> Option<mpsc::Sender<Request>> {
        let tx = self.tx.lock().await;
        tx.as_ref().filter(|tx| !tx.is_closed()).cloned()
    }

    /// Connect if needed. Exactly one connect attempt runs at a time;
    /// concurrent callers wait for it instead of dialing themselves.
    async fn ensure_connected(&self) -> Result<mpsc::Sender<Request>, BridgeError> {
        if let Some(tx) = self.live_sender().await {
            return Ok(tx);
        }

        let _gate = self.connect_gate.lock().await;
        if let Some(tx) = self.live_sender().await {
            return Ok(tx);
        }

        self.connect().await
    }

    /// One connect attempt with a bounded timeout; errors propagate.
    async fn connect(&self) -> Result<mpsc::Sender<Request>, BridgeError> {
        let (host, port) = self
            .target
            .clone()
            .ok_or_else(|| BridgeError::NotConfigured(format!("hqp instance {}", self.instance)))?;

        *self.conn_state.write().await = ConnState::Connecting;

        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port))).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                *self.conn_state.write().await = ConnState::Failed(e.to_string());
                return Err(BridgeError::Io(e));
            }
            Err(_) => {
                *self.conn_state.write().await = ConnState::Failed("connect timeout".into());
                return Err(BridgeError::Timeout);
            }
        };

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(connection_task(
            stream,
            rx,
            self.bus.clone(),
            self.instance.clone(),
            self.conn_state.clone(),
        ));

        *self.tx.lock().await = Some(tx.clone());
        *self.conn_state.write().await = ConnState::Connected;
        info!(instance = %self.instance, host = %host, "DSP control connection established");
        self.bus.publish(BusEvent::AdapterConnected {
            adapter: "hqp".to_string(),
        });

        self.refresh_enumerations(&tx).await?;
        Ok(tx)
    }

    /// Rebuild the cached enumerations: GetInfo, the four lists,
    /// VolumeRange and MatrixListProfiles, pipelined FIFO through the new
    /// connection.
    async fn refresh_enumerations(&self, tx: &mpsc::Sender<Request>) -> Result<(), BridgeError> {
        const COMMANDS: [&str; 7] = [
            "GetInfo",
            "GetModes",
            "GetFilters",
            "GetShapers",
            "GetRates",
            "VolumeRange",
            "MatrixListProfiles",
        ];

        let mut pending = Vec::with_capacity(COMMANDS.len());
        for cmd in COMMANDS {
            let (reply_tx, reply_rx) = oneshot::channel();
            tx.send(Request {
                xml: wire::build_request(cmd, &[]),
                reply: reply_tx,
            })
            .await
            .map_err(|_| BridgeError::Disconnected)?;
            pending.push(reply_rx);
        }

        let mut docs = Vec::with_capacity(COMMANDS.len());
        for reply in pending {
            docs.push(reply.await.map_err(|_| BridgeError::Disconnected)??);
        }

        let [info, modes, filters, shapers, rates, volume, matrix] = match docs.try_into() {
            Ok(docs) => docs,
            Err(_) => return Err(BridgeError::ProtocolMalformed("short refresh".into())),
        };

        let mut enums = self.enums.write().await;
        enums.info = Some(parse_info(&info));
        enums.modes = parse_list_items(&modes, "ModesItem");
        enums.filters = parse_filter_items(&filters);
        enums.shapers = parse_list_items(&shapers, "ShapersItem");
        enums.rates = parse_rate_items(&rates);
        enums.volume_range = Some(parse_volume_range(&volume));
        enums.matrix_profiles = parse_matrix_profiles(&matrix);
        debug!(
            instance = %self.instance,
            modes = enums.modes.len(),
            filters = enums.filters.len(),
            shapers = enums.shapers.len(),
            rates = enums.rates.len(),
            "enumeration caches refreshed"
        );
        Ok(())
    }

    /// Send one command and await its response document.
    pub(crate) async fn command(
        &self,
        command: &str,
        attrs: &[(&str, &str)],
    ) -> Result<ParsedDoc, BridgeError> {
        let tx = self.ensure_connected().await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Request {
            xml: wire::build_request(command, attrs),
            reply: reply_tx,
        })
        .await
        .map_err(|_| BridgeError::Disconnected)?;
        reply_rx.await.map_err(|_| BridgeError::Disconnected)?
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn info(&self) -> Result<DspInfo, BridgeError> {
        if let Some(info) = self.enums.read().await.info.clone() {
            return Ok(info);
        }
        let doc = self.command("GetInfo", &[]).await?;
        Ok(parse_info(&doc))
    }

    pub async fn state(&self) -> Result<DspState, BridgeError> {
        let doc = self.command("State", &[]).await?;
        Ok(parse_state(&doc))
    }

    pub async fn status(&self) -> Result<DspStatus, BridgeError> {
        let doc = self.command("Status", &[("subscribe", "0")]).await?;
        Ok(parse_status(&doc))
    }

    pub async fn volume_range(&self) -> Result<VolumeRange, BridgeError> {
        if let Some(range) = self.enums.read().await.volume_range.clone() {
            return Ok(range);
        }
        let doc = self.command("VolumeRange", &[]).await?;
        Ok(parse_volume_range(&doc))
    }

    pub async fn matrix_profiles(&self) -> Result<Vec<MatrixProfile>, BridgeError> {
        let cached = self.enums.read().await.matrix_profiles.clone();
        if !cached.is_empty() {
            return Ok(cached);
        }
        let doc = self.command("MatrixListProfiles", &[]).await?;
        Ok(parse_matrix_profiles(&doc))
    }

    /// Currently loaded matrix profile, if any.
    pub async fn matrix_profile(&self) -> Result<Option<MatrixProfile>, BridgeError> {
        let doc = self.command("MatrixGetProfile", &[]).await?;
        let index = doc.attr_u32("index");
        let name = doc
            .attr("value")
            .or_else(|| doc.attr("name"))
            .unwrap_or_default()
            .to_string();
        if name.is_empty() {
            Ok(None)
        } else {
            Ok(Some(MatrixProfile { index, name }))
        }
    }

    // =========================================================================
    // Setting mutations (all `value` attributes are list INDICES)
    // =========================================================================

    pub async fn set_mode_index(&self, index: u32) -> Result<(), BridgeError> {
        self.command("SetMode", &[("value", &index.to_string())])
            .await?;
        Ok(())
    }

    /// Set the Nx filter, and optionally the 1x filter in the same command.
    pub async fn set_filter_indices(
        &self,
        nx_index: u32,
        index_1x: Option<u32>,
    ) -> Result<(), BridgeError> {
        let nx = nx_index.to_string();
        let mut attrs: Vec<(&str, &str)> = vec![("value", nx.as_str())];
        let ox;
        if let Some(idx) = index_1x {
            ox = idx.to_string();
            attrs.push(("value1x", ox.as_str()));
        }
        self.command("SetFilter", &attrs).await?;
        Ok(())
    }

    pub async fn set_shaper_index(&self, index: u32) -> Result<(), BridgeError> {
        self.command("SetShaping", &[("value", &index.to_string())])
            .await?;
        Ok(())
    }

    pub async fn set_rate_index(&self, index: u32) -> Result<(), BridgeError> {
        self.command("SetRate", &[("value", &index.to_string())])
            .await?;
        Ok(())
    }

    pub async fn set_matrix_profile(&self, name: &str) -> Result<(), BridgeError> {
        self.command("MatrixSetProfile", &[("value", name)]).await?;
        Ok(())
    }

    // =========================================================================
    // Volume and transport
    // =========================================================================

    pub async fn set_volume_db(&self, value: i32) -> Result<(), BridgeError> {
        self.command("Volume", &[("value", &value.to_string())])
            .await?;
        Ok(())
    }

    pub async fn volume_up(&self) -> Result<(), BridgeError> {
        self.command("VolumeUp", &[]).await?;
        Ok(())
    }

    pub async fn volume_down(&self) -> Result<(), BridgeError> {
        self.command("VolumeDown", &[]).await?;
        Ok(())
    }

    pub async fn volume_mute(&self) -> Result<(), BridgeError> {
        self.command("VolumeMute", &[]).await?;
        Ok(())
    }

    pub async fn play(&self) -> Result<(), BridgeError> {
        self.command("Play", &[("last", "0")]).await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), BridgeError> {
        self.command("Pause", &[]).await?;
        Ok(())
    }

    pub async fn stop_playback(&self) -> Result<(), BridgeError> {
        self.command("Stop", &[]).await?;
        Ok(())
    }

    pub async fn previous(&self) -> Result<(), BridgeError> {
        self.command("Previous", &[]).await?;
        Ok(())
    }

    pub async fn next(&self) -> Result<(), BridgeError> {
        self.command("Next", &[]).await?;
        Ok(())
    }

    pub async fn seek(&self, position: u32) -> Result<(), BridgeError> {
        self.command("Seek", &[("position", &position.to_string())])
            .await?;
        Ok(())
    }
}

// =============================================================================
// Connection task
// =============================================================================

async fn write_request(write_half: &mut OwnedWriteHalf, xml: &str) -> std::io::Result<()> {
    write_half.write_all(xml.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    write_half.flush().await
}

/// Read lines until the assembler yields one complete document. Malformed
/// lines are logged and discarded; the connection is retained (they may be
/// noise interleaved with a streaming list).
async fn read_document(
    reader: &mut BufReader<OwnedReadHalf>,
    assembler: &mut DocAssembler,
) -> std::io::Result<String> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "control connection closed",
            ));
        }
        match assembler.push_line(&line) {
            Ok(Some(doc)) => return Ok(doc),
            Ok(None) => {}
            Err(e) => error!("discarding malformed protocol line: {e}"),
        }
    }
}

/// Owns the socket. Requests are handled strictly one at a time: write,
/// await the response document (or its deadline), deliver, next.
async fn connection_task(
    stream: TcpStream,
    mut rx: mpsc::Receiver<Request>,
    bus: SharedBus,
    instance: String,
    conn_state: Arc<RwLock<ConnState>>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut assembler = DocAssembler::new();

    loop {
        let request = tokio::select! {
            req = rx.recv() => match req {
                Some(req) => req,
                // Client dropped the sender: explicit disconnect
                None => break,
            },
            // Idle watch: notice server-side close without a request in
            // flight. fill_buf is cancellation-safe; anything buffered
            // between requests is protocol noise and gets dropped.
            available = async { reader.fill_buf().await.map(<[u8]>::len) } => {
                match available {
                    Ok(0) => {
                        debug!(instance = %instance, "server closed control connection");
                        break;
                    }
                    Ok(n) => {
                        debug!(instance = %instance, bytes = n, "discarding unsolicited data");
                        reader.consume(n);
                        continue;
                    }
                    Err(e) => {
                        warn!(instance = %instance, "control socket error: {e}");
                        break;
                    }
                }
            }
        };

        if let Err(e) = write_request(&mut write_half, &request.xml).await {
            warn!(instance = %instance, "write failed: {e}");
            let _ = request.reply.send(Err(BridgeError::Disconnected));
            break;
        }

        match timeout(RESPONSE_TIMEOUT, read_document(&mut reader, &mut assembler)).await {
            Ok(Ok(doc)) => {
                let result = wire::parse_doc(&doc)
                    .map_err(|e| BridgeError::ProtocolMalformed(e.to_string()));
                let _ = request.reply.send(result);
            }
            Ok(Err(e)) => {
                debug!(instance = %instance, "read failed: {e}");
                let _ = request.reply.send(Err(BridgeError::Disconnected));
                break;
            }
            Err(_) => {
                // Fail this request, keep the connection, serve the next.
                // Partial input is dropped so a late response cannot bleed
                // into the next document.
                warn!(instance = %instance, "response timed out");
                assembler.reset();
                let _ = request.reply.send(Err(BridgeError::Timeout));
            }
        }
    }

    *conn_state.write().await = ConnState::Draining;
    rx.close();
    while let Some(request) = rx.recv().await {
        let _ = request.reply.send(Err(BridgeError::Disconnected));
    }
    *conn_state.write().await = ConnState::Idle;

    bus.publish(BusEvent::AdapterDisconnected {
        adapter: "hqp".to_string(),
    });
    info!(instance = %instance, "DSP control connection closed");
}

// =============================================================================
// Response parsing
// =============================================================================

fn get_u32(attrs: &HashMap<String, String>, key: &str) -> u32 {
    attrs.get(key).and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn get_i32(attrs: &HashMap<String, String>, key: &str) -> i32 {
    attrs.get(key).and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn get_string(attrs: &HashMap<String, String>, key: &str) -> String {
    attrs.get(key).cloned().unwrap_or_default()
}

fn parse_info(doc: &ParsedDoc) -> DspInfo {
    DspInfo {
        name: doc.attr_string("name"),
        product: doc.attr_string("product"),
        version: doc.attr_string("version"),
        platform: doc.attr_string("platform"),
        engine: doc.attr_string("engine"),
    }
}

fn parse_state(doc: &ParsedDoc) -> DspState {
    DspState {
        state: doc.attr_u32("state") as u8,
        mode_idx: doc.attr_u32("mode"),
        filter_idx: doc.attr_u32("filter"),
        filter1x_idx: doc.attr_opt_u32("filter1x"),
        filter_nx_idx: doc.attr_opt_u32("filterNx"),
        shaper_idx: doc.attr_u32("shaper"),
        rate_idx: doc.attr_u32("rate"),
        volume_db: doc.attr_i32("volume"),
        active_mode_idx: doc.attr_u32("active_mode"),
        active_rate_hz: doc.attr_u32("active_rate"),
        invert: doc.attr_bool("invert"),
        convolution: doc.attr_bool("convolution"),
        repeat: doc.attr_u32("repeat") as u8,
        random: doc.attr_bool("random"),
        adaptive: doc.attr_bool("adaptive"),
        filter_20k: doc.attr_bool("filter_20k"),
        matrix_profile: doc.attr_string("matrix_profile"),
    }
}

fn parse_status(doc: &ParsedDoc) -> DspStatus {
    DspStatus {
        state: doc.attr_u32("state") as u8,
        track: doc.attr_u32("track"),
        track_id: doc.attr_string("track_id"),
        position: doc.attr_u32("position"),
        length: doc.attr_u32("length"),
        volume_db: doc.attr_i32("volume"),
        active_mode: doc.attr_string("active_mode"),
        active_filter: doc.attr_string("active_filter"),
        active_shaper: doc.attr_string("active_shaper"),
        active_rate: doc.attr_u32("active_rate"),
        active_bits: doc.attr_u32("active_bits"),
        active_channels: doc.attr_u32("active_channels"),
    }
}

fn parse_volume_range(doc: &ParsedDoc) -> VolumeRange {
    VolumeRange {
        min: doc.attr_i32("min"),
        max: doc.attr_i32("max"),
        step: doc.attr_i32("step").max(1),
        enabled: doc.attr_bool("enabled"),
        adaptive: doc.attr_bool("adaptive"),
    }
}

fn parse_list_items(doc: &ParsedDoc, tag: &str) -> Vec<ListItem> {
    doc.items_named(tag)
        .map(|attrs| ListItem {
            index: get_u32(attrs, "index"),
            value: get_i32(attrs, "value"),
            name: get_string(attrs, "name"),
        })
        .collect()
}

fn parse_filter_items(doc: &ParsedDoc) -> Vec<FilterItem> {
    doc.items_named("FiltersItem")
        .map(|attrs| FilterItem {
            index: get_u32(attrs, "index"),
            value: get_i32(attrs, "value"),
            name: get_string(attrs, "name"),
            arg: get_u32(attrs, "arg"),
        })
        .collect()
}

fn parse_rate_items(doc: &ParsedDoc) -> Vec<RateItem> {
    doc.items_named("RatesItem")
        .map(|attrs| RateItem {
            index: get_u32(attrs, "index"),
            rate: get_u32(attrs, "rate"),
        })
        .collect()
}

fn parse_matrix_profiles(doc: &ParsedDoc) -> Vec<MatrixProfile> {
    doc.items_named("MatrixProfile")
        .map(|attrs| MatrixProfile {
            index: get_u32(attrs, "index"),
            name: get_string(attrs, "name"),
        })
        .collect()
}
