//! In-process job server and scripted admin server for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use gear_core::{AdminConnection, Command, JobConnection, Packet};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Submissions for this function are refused with an `ERROR` packet.
pub const REJECTED_FUNCTION: &str = "reject-me";

/// The first submission of each unique id for this function is answered
/// with `JOB_CREATED`, then the client connection is closed and the job
/// forgotten. Later submissions of the same unique id are queued normally.
pub const VANISHING_FUNCTION: &str = "vanishing";

pub const JACKDAWS: &str = "Jackdaws love my big sphynx of quartz";
pub const JACKDAWS_REVERSED: &str = "ztrauq fo xhnyps gib ym evol swadkcaJ";

// ── Job server ───────────────────────────────────────────────────

struct Queued {
    handle: String,
    function: String,
    unique: String,
    payload: Vec<u8>,
}

struct Record {
    /// Connection waiting for results; `None` for background jobs.
    client: Option<usize>,
    running: bool,
    numerator: String,
    denominator: String,
}

#[derive(Default)]
struct Broker {
    next_conn: usize,
    next_handle: u64,
    queue: VecDeque<Queued>,
    jobs: HashMap<String, Record>,
    abilities: HashMap<usize, HashSet<String>>,
    sleeping: HashSet<usize>,
    wants_exceptions: HashSet<usize>,
    vanished: HashSet<String>,
    writers: HashMap<usize, mpsc::UnboundedSender<Packet>>,
}

impl Broker {
    fn send(&self, conn: usize, command: Command, args: &[&[u8]]) {
        if let (Some(tx), Ok(packet)) = (self.writers.get(&conn), Packet::response(command, args)) {
            let _ = tx.send(packet);
        }
    }

    fn can_do(&self, conn: usize, function: &str) -> bool {
        self.abilities.get(&conn).is_some_and(|a| a.contains(function))
    }

    fn has_work_for(&self, conn: usize) -> bool {
        self.queue.iter().any(|q| self.can_do(conn, &q.function))
    }

    fn wake(&mut self, function: &str) {
        let ready: Vec<usize> = self
            .sleeping
            .iter()
            .copied()
            .filter(|c| self.can_do(*c, function))
            .collect();
        for conn in ready {
            self.sleeping.remove(&conn);
            self.send(conn, Command::Noop, &[]);
        }
    }

    fn handle(&mut self, conn: usize, packet: Packet) {
        let arg = |i: usize| String::from_utf8_lossy(packet.arg(i)).into_owned();
        match packet.command() {
            Command::CanDo | Command::CanDoTimeout => {
                self.abilities.entry(conn).or_default().insert(arg(0));
            }
            Command::CantDo => {
                self.abilities.entry(conn).or_default().remove(&arg(0));
            }
            Command::ResetAbilities => {
                self.abilities.remove(&conn);
            }
            Command::SetClientId => {}
            Command::PreSleep => {
                if self.has_work_for(conn) {
                    self.send(conn, Command::Noop, &[]);
                } else {
                    self.sleeping.insert(conn);
                }
            }
            Command::GrabJob | Command::GrabJobUniq => {
                let pos = self.queue.iter().position(|q| self.can_do(conn, &q.function));
                match pos.and_then(|p| self.queue.remove(p)) {
                    Some(job) => {
                        if let Some(record) = self.jobs.get_mut(&job.handle) {
                            record.running = true;
                        }
                        let h = job.handle.as_bytes();
                        let f = job.function.as_bytes();
                        if packet.command() == Command::GrabJobUniq {
                            self.send(conn, Command::JobAssignUniq, &[h, f, job.unique.as_bytes(), &job.payload]);
                        } else {
                            self.send(conn, Command::JobAssign, &[h, f, &job.payload]);
                        }
                    }
                    None => self.send(conn, Command::NoJob, &[]),
                }
            }
            cmd @ (Command::SubmitJob
            | Command::SubmitJobBg
            | Command::SubmitJobHigh
            | Command::SubmitJobHighBg
            | Command::SubmitJobLow
            | Command::SubmitJobLowBg) => {
                let function = arg(0);
                if function == REJECTED_FUNCTION {
                    self.send(conn, Command::Error, &[b"ERR_QUEUE_FULL", b"queue is full"]);
                    return;
                }
                self.next_handle += 1;
                let handle = format!("H:mock:{}", self.next_handle);
                if function == VANISHING_FUNCTION && self.vanished.insert(arg(1)) {
                    self.send(conn, Command::JobCreated, &[handle.as_bytes()]);
                    // Dropping the writer ends the connection once the
                    // reply above is flushed.
                    self.writers.remove(&conn);
                    return;
                }
                let background = matches!(
                    cmd,
                    Command::SubmitJobBg | Command::SubmitJobHighBg | Command::SubmitJobLowBg
                );
                self.jobs.insert(
                    handle.clone(),
                    Record {
                        client: (!background).then_some(conn),
                        running: false,
                        numerator: "0".into(),
                        denominator: "0".into(),
                    },
                );
                let job = Queued {
                    handle: handle.clone(),
                    function: function.clone(),
                    unique: arg(1),
                    payload: packet.arg(2).to_vec(),
                };
                if matches!(cmd, Command::SubmitJobHigh | Command::SubmitJobHighBg) {
                    self.queue.push_front(job);
                } else {
                    self.queue.push_back(job);
                }
                self.send(conn, Command::JobCreated, &[handle.as_bytes()]);
                self.wake(&function);
            }
            cmd @ (Command::WorkData
            | Command::WorkWarning
            | Command::WorkStatus
            | Command::WorkComplete
            | Command::WorkFail
            | Command::WorkException) => {
                let handle = arg(0);
                let terminal = matches!(
                    cmd,
                    Command::WorkComplete | Command::WorkFail | Command::WorkException
                );
                let client = match self.jobs.get_mut(&handle) {
                    Some(record) => {
                        if cmd == Command::WorkStatus {
                            record.numerator = arg(1);
                            record.denominator = arg(2);
                        }
                        record.client
                    }
                    None => return,
                };
                if terminal {
                    self.jobs.remove(&handle);
                }
                let Some(client) = client else { return };

                let args: Vec<&[u8]> = packet.args().iter().map(Vec::as_slice).collect();
                if cmd == Command::WorkException && !self.wants_exceptions.contains(&client) {
                    self.send(client, Command::WorkFail, &args[..1]);
                } else {
                    self.send(client, cmd, &args);
                }
            }
            Command::GetStatus => {
                let handle = arg(0);
                match self.jobs.get(&handle) {
                    Some(r) => {
                        let running: &[u8] = if r.running { b"1" } else { b"0" };
                        self.send(
                            conn,
                            Command::StatusRes,
                            &[handle.as_bytes(), b"1", running, r.numerator.as_bytes(), r.denominator.as_bytes()],
                        );
                    }
                    None => self.send(conn, Command::StatusRes, &[handle.as_bytes(), b"0", b"0", b"0", b"0"]),
                }
            }
            Command::EchoReq => self.send(conn, Command::EchoRes, &[packet.payload()]),
            Command::OptionReq => {
                if packet.payload() == b"exceptions" {
                    self.wants_exceptions.insert(conn);
                    self.send(conn, Command::OptionRes, &[b"exceptions"]);
                } else {
                    self.send(conn, Command::Error, &[b"UNKNOWN_OPTION", b"unknown option"]);
                }
            }
            _ => {}
        }
    }

    fn disconnect(&mut self, conn: usize) {
        self.writers.remove(&conn);
        self.abilities.remove(&conn);
        self.sleeping.remove(&conn);
        self.wants_exceptions.remove(&conn);
    }
}

/// A minimal job server: queues submissions, hands them to workers that
/// can do them and forwards work packets back to waiting clients.
pub struct MockServer {
    pub addr: SocketAddr,
    accept: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = Arc::new(Mutex::new(Broker::default()));

        let accept = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let broker = broker.clone();
                tokio::spawn(serve(JobConnection::new(stream, peer.to_string()), broker));
            }
        });
        Self { addr, accept }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> i32 {
        i32::from(self.addr.port())
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(mut conn: JobConnection, broker: Arc<Mutex<Broker>>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = {
        let mut b = broker.lock().unwrap();
        b.next_conn += 1;
        let id = b.next_conn;
        b.writers.insert(id, tx);
        id
    };

    loop {
        tokio::select! {
            incoming = conn.recv() => match incoming {
                Ok(packet) => broker.lock().unwrap().handle(id, packet),
                Err(_) => break,
            },
            outgoing = rx.recv() => match outgoing {
                Some(packet) => {
                    if conn.send(packet).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    broker.lock().unwrap().disconnect(id);
}

/// An address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

// ── Admin server ─────────────────────────────────────────────────

/// Scripted admin server: answers each known command line with fixed
/// reply lines and records every line it receives.
pub struct ScriptedAdmin {
    pub addr: SocketAddr,
    pub received: Arc<Mutex<Vec<String>>>,
    accept: JoinHandle<()>,
}

impl ScriptedAdmin {
    /// `script` maps command lines to reply lines. Unknown commands get
    /// `ERR UNKNOWN_COMMAND`; lines starting with `shutdown` close the
    /// connection after replying. An empty reply list means never answer.
    pub async fn start(script: &[(&str, &[&str])]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let script: Arc<HashMap<String, Vec<String>>> = Arc::new(
            script
                .iter()
                .map(|(cmd, reply)| (cmd.to_string(), reply.iter().map(|l| l.to_string()).collect()))
                .collect(),
        );
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let script = script.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let mut conn = AdminConnection::new(stream, peer.to_string());
                    while let Ok(line) = conn.recv().await {
                        log.lock().unwrap().push(line.clone());
                        let reply = match script.get(&line) {
                            Some(reply) => reply.clone(),
                            None => vec!["ERR UNKNOWN_COMMAND Unknown+server+command".to_string()],
                        };
                        for row in reply {
                            if conn.send(row).await.is_err() {
                                return;
                            }
                        }
                        if line.starts_with("shutdown") {
                            return;
                        }
                    }
                });
            }
        });
        Self {
            addr,
            received,
            accept,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> i32 {
        i32::from(self.addr.port())
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for ScriptedAdmin {
    fn drop(&mut self) {
        self.accept.abort();
    }
}
