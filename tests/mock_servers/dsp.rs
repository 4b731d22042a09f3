#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(dead_code)] // each test binary exercises a different subset
//! Mock DSP engine speaking the TCP/XML control protocol.
//!
//! Stateful: Set commands mutate the mock's state using the positional
//! index carried in `value`, exactly like the real engine, so index
//! round-trips are observable. List responses can be switched between the
//! single-document shape and the streaming open/items/close shape.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Mutable engine state; fields hold list indices like the real protocol.
#[derive(Debug, Clone)]
pub struct MockDspState {
    pub state: u8,
    pub mode: u32,
    pub filter: u32,
    pub filter1x: Option<u32>,
    pub filter_nx: Option<u32>,
    pub shaper: u32,
    pub rate: u32,
    pub volume: i32,
    /// Index into the mode list ("what is actually playing").
    pub active_mode: u32,
    pub active_rate: u32,
    pub position: u32,
    pub length: u32,
    pub filter_count: usize,
}

impl Default for MockDspState {
    fn default() -> Self {
        Self {
            state: 0,
            mode: 0,
            filter: 0,
            filter1x: None,
            filter_nx: None,
            shaper: 0,
            rate: 0,
            volume: -20,
            active_mode: 0,
            active_rate: 0,
            position: 0,
            length: 0,
            filter_count: 30,
        }
    }
}

/// Filter table: stable names at fixed positions, deliberately
/// non-contiguous values (position 2 carries value 57).
pub fn filter_entry(index: usize) -> (String, i32) {
    match index {
        0 => ("none".to_string(), 0),
        1 => ("IIR".to_string(), 1),
        2 => ("IIR2".to_string(), 57),
        19 => ("poly-sinc-ext".to_string(), 15),
        i => (format!("filter-{}", i), i as i32 + 100),
    }
}

const MODES: &[(u32, &str, i32)] = &[(0, "[source]", -1), (1, "SDM", 1), (2, "PCM", 0)];
const SHAPERS: &[(u32, &str, i32)] = &[
    (0, "none", 0),
    (1, "LNS15", 1),
    (2, "ASDM5", 4),
    (3, "ASDM7", 9),
];
const RATES: &[(u32, u32)] = &[
    (0, 0),
    (1, 44_100),
    (2, 48_000),
    (3, 88_200),
    (4, 96_000),
    (5, 352_800),
    (6, 705_600),
];
const MATRIX_PROFILES: &[(u32, &str)] = &[(0, "Default"), (1, "Night")];

pub struct MockDspServer {
    addr: SocketAddr,
    state: Arc<RwLock<MockDspState>>,
    commands: Arc<Mutex<Vec<String>>>,
    streaming_lists: Arc<AtomicBool>,
    inject_noise: Arc<AtomicBool>,
    drop_before_response: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accept_task: JoinHandle<()>,
}

impl MockDspServer {
    pub async fn start() -> Self {
        let state = Arc::new(RwLock::new(MockDspState::default()));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let streaming_lists = Arc::new(AtomicBool::new(false));
        let inject_noise = Arc::new(AtomicBool::new(false));
        let drop_before_response = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(Mutex::new(Vec::new()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_task = {
            let state = state.clone();
            let commands = commands.clone();
            let streaming = streaming_lists.clone();
            let noise = inject_noise.clone();
            let drop_flag = drop_before_response.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let conn = Connection {
                        state: state.clone(),
                        commands: commands.clone(),
                        streaming: streaming.clone(),
                        noise: noise.clone(),
                        drop_flag: drop_flag.clone(),
                    };
                    let handle = tokio::spawn(async move { conn.serve(stream).await });
                    connections.lock().await.push(handle);
                }
            })
        };

        Self {
            addr,
            state,
            commands,
            streaming_lists,
            inject_noise,
            drop_before_response,
            connections,
            accept_task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host_port(&self) -> (String, u16) {
        (self.addr.ip().to_string(), self.addr.port())
    }

    pub async fn state(&self) -> MockDspState {
        self.state.read().await.clone()
    }

    pub async fn mutate_state(&self, f: impl FnOnce(&mut MockDspState)) {
        f(&mut *self.state.write().await);
    }

    /// Raw command lines received, declaration stripped.
    pub async fn received_commands(&self) -> Vec<String> {
        self.commands.lock().await.clone()
    }

    pub async fn clear_commands(&self) {
        self.commands.lock().await.clear();
    }

    /// Answer list commands as open line, one item per line, close line.
    pub fn set_streaming_lists(&self, on: bool) {
        self.streaming_lists.store(on, Ordering::SeqCst);
    }

    /// Prepend a malformed line to every response.
    pub fn set_inject_noise(&self, on: bool) {
        self.inject_noise.store(on, Ordering::SeqCst);
    }

    /// Close the connection after receiving the next command, before
    /// responding.
    pub fn set_drop_before_response(&self, on: bool) {
        self.drop_before_response.store(on, Ordering::SeqCst);
    }

    /// Sever all established connections (server keeps accepting).
    pub async fn kick_clients(&self) {
        for handle in self.connections.lock().await.drain(..) {
            handle.abort();
        }
    }

    pub async fn stop(self) {
        self.accept_task.abort();
        self.kick_clients().await;
    }
}

struct Connection {
    state: Arc<RwLock<MockDspState>>,
    commands: Arc<Mutex<Vec<String>>>,
    streaming: Arc<AtomicBool>,
    noise: Arc<AtomicBool>,
    drop_flag: Arc<AtomicBool>,
}

impl Connection {
    async fn serve(&self, stream: TcpStream) {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }

            let command = strip_declaration(line.trim());
            if command.is_empty() {
                continue;
            }
            self.commands.lock().await.push(command.to_string());

            if self.drop_flag.swap(false, Ordering::SeqCst) {
                break;
            }

            let mut response = String::new();
            if self.noise.load(Ordering::SeqCst) {
                response.push_str("!!not-xml-noise!!\n");
            }
            response.push_str(&self.respond(command).await);

            if writer.write_all(response.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    async fn respond(&self, command: &str) -> String {
        let name = element_name(command);
        let streaming = self.streaming.load(Ordering::SeqCst);

        match name.as_str() {
            "GetInfo" => concat!(
                "<?xml version=\"1.0\"?>\n",
                "<GetInfo name=\"Mock Music Room\" product=\"HQPlayer Embedded\" ",
                "version=\"5.3.1\" platform=\"mock\" engine=\"mock\"/>\n"
            )
            .to_string(),

            "State" => {
                let s = self.state.read().await.clone();
                let mut attrs = format!(
                    "state=\"{}\" mode=\"{}\" filter=\"{}\" shaper=\"{}\" rate=\"{}\" \
                     volume=\"{}\" active_mode=\"{}\" active_rate=\"{}\" invert=\"0\" \
                     convolution=\"0\" repeat=\"0\" random=\"0\" adaptive=\"0\" \
                     filter_20k=\"0\" matrix_profile=\"Default\"",
                    s.state, s.mode, s.filter, s.shaper, s.rate, s.volume, s.active_mode,
                    s.active_rate,
                );
                if let Some(f1x) = s.filter1x {
                    attrs.push_str(&format!(" filter1x=\"{}\"", f1x));
                }
                if let Some(fnx) = s.filter_nx {
                    attrs.push_str(&format!(" filterNx=\"{}\"", fnx));
                }
                format!("<?xml version=\"1.0\"?>\n<State {}/>\n", attrs)
            }

            "Status" => {
                let s = self.state.read().await.clone();
                let (filter_name, _) = filter_entry(s.filter as usize);
                let shaper_name = SHAPERS
                    .iter()
                    .find(|(i, _, _)| *i == s.shaper)
                    .map(|(_, n, _)| *n)
                    .unwrap_or("none");
                let mode_name = MODES
                    .iter()
                    .find(|(i, _, _)| *i == s.active_mode)
                    .map(|(_, n, _)| *n)
                    .unwrap_or("");
                format!(
                    "<?xml version=\"1.0\"?>\n<Status state=\"{}\" track=\"1\" \
                     track_id=\"t1\" position=\"{}\" length=\"{}\" volume=\"{}\" \
                     active_mode=\"{}\" active_filter=\"{}\" active_shaper=\"{}\" \
                     active_rate=\"{}\" active_bits=\"32\" active_channels=\"2\"/>\n",
                    s.state, s.position, s.length, s.volume, mode_name, filter_name,
                    shaper_name, s.active_rate,
                )
            }

            "VolumeRange" => concat!(
                "<?xml version=\"1.0\"?>\n",
                "<VolumeRange min=\"-60\" max=\"0\" step=\"1\" enabled=\"1\" adaptive=\"0\"/>\n"
            )
            .to_string(),

            "GetModes" => {
                let items: Vec<String> = MODES
                    .iter()
                    .map(|(i, n, v)| {
                        format!("<ModesItem index=\"{}\" name=\"{}\" value=\"{}\"/>", i, n, v)
                    })
                    .collect();
                list_response("GetModes", &items, streaming)
            }

            "GetFilters" => {
                let count = self.state.read().await.filter_count;
                let items: Vec<String> = (0..count)
                    .map(|i| {
                        let (name, value) = filter_entry(i);
                        format!(
                            "<FiltersItem index=\"{}\" name=\"{}\" value=\"{}\" arg=\"0\"/>",
                            i, name, value
                        )
                    })
                    .collect();
                list_response("GetFilters", &items, streaming)
            }

            "GetShapers" => {
                let items: Vec<String> = SHAPERS
                    .iter()
                    .map(|(i, n, v)| {
                        format!("<ShapersItem index=\"{}\" name=\"{}\" value=\"{}\"/>", i, n, v)
                    })
                    .collect();
                list_response("GetShapers", &items, streaming)
            }

            "GetRates" => {
                let items: Vec<String> = RATES
                    .iter()
                    .map(|(i, r)| format!("<RatesItem index=\"{}\" rate=\"{}\"/>", i, r))
                    .collect();
                list_response("GetRates", &items, streaming)
            }

            "MatrixListProfiles" => {
                let items: Vec<String> = MATRIX_PROFILES
                    .iter()
                    .map(|(i, n)| format!("<MatrixProfile index=\"{}\" name=\"{}\"/>", i, n))
                    .collect();
                list_response("MatrixListProfiles", &items, streaming)
            }

            "MatrixGetProfile" => {
                "<?xml version=\"1.0\"?>\n<MatrixGetProfile index=\"0\" value=\"Default\"/>\n"
                    .to_string()
            }

            "SetMode" => {
                let value = attr_u32(command, "value");
                let mut s = self.state.write().await;
                s.mode = value;
                s.active_mode = value;
                ok()
            }
            "SetFilter" => {
                let value = attr_u32(command, "value");
                let mut s = self.state.write().await;
                s.filter = value;
                if let Some(v1x) = attr_opt_u32(command, "value1x") {
                    s.filter_nx = Some(value);
                    s.filter1x = Some(v1x);
                }
                ok()
            }
            "SetShaping" => {
                self.state.write().await.shaper = attr_u32(command, "value");
                ok()
            }
            "SetRate" => {
                let value = attr_u32(command, "value");
                let mut s = self.state.write().await;
                s.rate = value;
                s.active_rate = RATES
                    .iter()
                    .find(|(i, _)| *i == value)
                    .map(|(_, r)| *r)
                    .unwrap_or(0);
                ok()
            }
            "Volume" => {
                self.state.write().await.volume = attr_i32(command, "value");
                ok()
            }
            "VolumeUp" => {
                self.state.write().await.volume += 1;
                ok()
            }
            "VolumeDown" => {
                self.state.write().await.volume -= 1;
                ok()
            }
            "Play" => {
                self.state.write().await.state = 2;
                ok()
            }
            "Pause" => {
                self.state.write().await.state = 1;
                ok()
            }
            "Stop" => {
                self.state.write().await.state = 0;
                ok()
            }
            "Seek" => {
                self.state.write().await.position = attr_u32(command, "position");
                ok()
            }
            "Previous" | "Next" | "VolumeMute" | "MatrixSetProfile" => ok(),

            other => format!(
                "<?xml version=\"1.0\"?>\n<Error message=\"unknown command {}\"/>\n",
                other
            ),
        }
    }
}

fn ok() -> String {
    "<?xml version=\"1.0\"?>\n<Ok/>\n".to_string()
}

fn list_response(container: &str, items: &[String], streaming: bool) -> String {
    if streaming {
        let mut out = format!("<?xml version=\"1.0\"?>\n<{}>\n", container);
        for item in items {
            out.push_str(item);
            out.push('\n');
        }
        out.push_str(&format!("</{}>\n", container));
        out
    } else {
        format!(
            "<?xml version=\"1.0\"?>\n<{}>{}</{}>\n",
            container,
            items.join(""),
            container
        )
    }
}

fn strip_declaration(line: &str) -> &str {
    match line.find("?>") {
        Some(end) if line.starts_with("<?") => line[end + 2..].trim(),
        _ => line,
    }
}

fn element_name(xml: &str) -> String {
    let xml = xml.trim_start();
    if !xml.starts_with('<') {
        return String::new();
    }
    xml[1..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '/' && *c != '>')
        .collect()
}

fn attr_value<'a>(xml: &'a str, attr: &str) -> Option<&'a str> {
    let pattern = format!("{}=\"", attr);
    let start = xml.find(&pattern)? + pattern.len();
    let end = xml[start..].find('"')?;
    Some(&xml[start..start + end])
}

fn attr_u32(xml: &str, attr: &str) -> u32 {
    attr_value(xml, attr)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn attr_opt_u32(xml: &str, attr: &str) -> Option<u32> {
    attr_value(xml, attr).and_then(|v| v.parse().ok())
}

fn attr_i32(xml: &str, attr: &str) -> i32 {
    attr_value(xml, attr)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
