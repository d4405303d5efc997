//! Collaboration script replay.
//!
//! Usage: cogrid replay script.jsonl [--config collab.toml] [--workbook id]
//!
//! A script is JSONL: one protocol v1 `ClientMessage` per line. Every line is
//! run against an in-process hub and everything it produces is written out as
//! `ServerMessage` JSONL: the direct reply first, then whatever each session's
//! event queue holds, sessions in label order. Blank lines and lines starting
//! with `#` are skipped.
//!
//! Sessions are named by the labels the script gives them in `connect`; the
//! host-assigned ids only appear in `welcome`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use cogrid_collab::{wire, CollabError, EventReceiver, Hub};
use cogrid_config::CollabSettings;
use cogrid_engine::{SessionId, ValueChangeSet};
use cogrid_protocol::*;

use crate::exit_codes::EXIT_REPLAY_HOST;
use crate::CliError;

/// Outcome of a replayed script.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    /// Client messages executed.
    pub messages: usize,
    /// Messages answered with an error.
    pub errors: usize,
    pub workbooks: Vec<String>,
}

/// A request that was answered with an error message.
#[derive(Debug)]
struct Rejection {
    code: String,
    message: String,
}

impl Rejection {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<CollabError> for Rejection {
    fn from(err: CollabError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

struct Participant {
    workbook: String,
    session: SessionId,
    events: EventReceiver,
}

pub struct Replayer {
    hub: Hub,
    participants: BTreeMap<String, Participant>,
    messages: usize,
    errors: usize,
}

impl Replayer {
    pub fn new(settings: CollabSettings) -> Self {
        Self {
            hub: Hub::new(settings),
            participants: BTreeMap::new(),
            messages: 0,
            errors: 0,
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Open a workbook before any message names it.
    pub fn open_workbook(&self, id: &str) -> Result<(), CliError> {
        self.hub
            .open_workbook(id)
            .map(|_| ())
            .map_err(|e| CliError::new(EXIT_REPLAY_HOST, e.to_string()))
    }

    pub fn summary(&self) -> ReplaySummary {
        ReplaySummary {
            messages: self.messages,
            errors: self.errors,
            workbooks: self.hub.workbook_ids(),
        }
    }

    /// Run one client message and return everything it produced.
    pub fn handle(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        self.messages += 1;
        let id = msg.id().to_string();
        let reply = self.dispatch(msg).unwrap_or_else(|rejection| {
            self.errors += 1;
            ServerMessage::Error(ErrorMessage {
                id,
                code: rejection.code,
                message: rejection.message,
            })
        });

        let mut out = vec![reply];
        out.extend(self.drain_events());
        out
    }

    fn dispatch(&mut self, msg: ClientMessage) -> Result<ServerMessage, Rejection> {
        match msg {
            ClientMessage::Connect(m) => self.connect(m),
            ClientMessage::Submit(m) => {
                let (workbook, session) = self.participant(&m.session)?;
                let set = self
                    .hub
                    .submit_operation(&workbook, &m.address, &m.raw, m.base_version, session)?;
                Ok(self.submit_result(m.id, &set))
            }
            ClientMessage::Ack(m) => {
                let (workbook, session) = self.participant(&m.session)?;
                let version = self.hub.workbook(&workbook)?.ack(session, m.version)?;
                Ok(done(m.id, version))
            }
            ClientMessage::Disconnect(m) => {
                let (workbook, session) = self.participant(&m.session)?;
                let frozen = self.hub.workbook(&workbook)?.disconnect(session)?;
                Ok(done(m.id, frozen))
            }
            ClientMessage::Reconnect(m) => self.reconnect(m),
            ClientMessage::Leave(m) => {
                let (workbook, session) = self.participant(&m.session)?;
                let handle = self.hub.workbook(&workbook)?;
                handle.leave(session)?;
                self.participants.remove(&m.session);
                Ok(done(m.id, handle.version()))
            }
            ClientMessage::AddSheet(m) => {
                let set = self.hub.open_or_get(&m.workbook)?.add_sheet(&m.name)?;
                Ok(self.submit_result(m.id, &set))
            }
            ClientMessage::GetCell(m) => {
                let cell = self.hub.get_cell(&m.workbook, &m.address)?;
                Ok(ServerMessage::Cell(CellMessage {
                    id: m.id,
                    version: self.hub.workbook(&m.workbook)?.version(),
                    cell: wire::wire_cell(&cell),
                }))
            }
            ClientMessage::GetWorksheet(m) => {
                let cells = self.hub.get_worksheet(&m.workbook, &m.sheet)?;
                Ok(ServerMessage::Worksheet(WorksheetMessage {
                    id: m.id,
                    version: self.hub.workbook(&m.workbook)?.version(),
                    sheet: m.sheet,
                    cells: cells.iter().map(wire::wire_cell).collect(),
                }))
            }
        }
    }

    fn connect(&mut self, m: ConnectMessage) -> Result<ServerMessage, Rejection> {
        if m.protocol_version != PROTOCOL_VERSION {
            return Err(Rejection::new(
                "protocol_version",
                format!(
                    "unsupported protocol version {} (expected {})",
                    m.protocol_version, PROTOCOL_VERSION
                ),
            ));
        }
        if self.participants.contains_key(&m.session) {
            return Err(Rejection::new(
                "duplicate_session",
                format!("session {:?} is already connected", m.session),
            ));
        }

        let connected = self.hub.open_or_get(&m.workbook)?.connect()?;
        self.participants.insert(
            m.session.clone(),
            Participant {
                workbook: m.workbook.clone(),
                session: connected.session,
                events: connected.events,
            },
        );
        Ok(ServerMessage::Welcome(WelcomeMessage {
            id: m.id,
            session: m.session,
            session_id: connected.session.to_string(),
            workbook: m.workbook,
            protocol_version: PROTOCOL_VERSION,
            version: connected.version,
        }))
    }

    fn reconnect(&mut self, m: ReconnectMessage) -> Result<ServerMessage, Rejection> {
        let (workbook, session) = self.participant(&m.session)?;
        let back = self.hub.resync(&workbook, session, m.last_known_version)?;
        let payload = wire::resync_payload(&workbook, back.from_version, &back.resync);
        if let Some(participant) = self.participants.get_mut(&m.session) {
            participant.events = back.events;
        }
        Ok(ServerMessage::Resync(ResyncMessage {
            id: m.id,
            session: m.session,
            payload,
        }))
    }

    fn participant(&self, label: &str) -> Result<(String, SessionId), Rejection> {
        self.participants
            .get(label)
            .map(|p| (p.workbook.clone(), p.session))
            .ok_or_else(|| Rejection::new("unknown_session", format!("no session named {:?}", label)))
    }

    /// Script label of a session, or its id if it has none.
    fn label(&self, session: SessionId) -> String {
        self.participants
            .iter()
            .find(|(_, p)| p.session == session)
            .map(|(label, _)| label.clone())
            .unwrap_or_else(|| session.to_string())
    }

    fn submit_result(&self, id: String, set: &ValueChangeSet) -> ServerMessage {
        ServerMessage::SubmitResult(SubmitResultMessage {
            id,
            version: set.version,
            changes: wire::wire_changes(&set.changes),
            notices: wire::wire_notices(&set.notices, &|s| self.label(s)),
        })
    }

    fn drain_events(&self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        for (label, participant) in &self.participants {
            for event in participant.events.drain() {
                let envelope =
                    wire::event_envelope(&participant.workbook, participant.session, &event, &|s| self.label(s));
                if let Some(envelope) = envelope {
                    out.push(ServerMessage::Event(EventMessage {
                        session: label.clone(),
                        envelope,
                    }));
                }
            }
        }
        out
    }
}

fn done(id: String, version: u64) -> ServerMessage {
    ServerMessage::Done(DoneMessage { id, version })
}

/// Replay JSONL from `input`, writing server messages to `output`.
pub fn run_script<R: BufRead, W: Write>(
    replayer: &mut Replayer,
    input: R,
    mut output: W,
) -> Result<ReplaySummary, CliError> {
    for (index, line) in input.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|e| CliError::io(format!("line {}: {}", line_no, e)))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let msg: ClientMessage = serde_json::from_str(line).map_err(|e| {
            CliError::bad_message(format!("line {}: {}", line_no, e))
                .with_hint("each line must be one protocol v1 client message")
        })?;

        for reply in replayer.handle(msg) {
            let json = serde_json::to_string(&reply).map_err(|e| CliError::io(e.to_string()))?;
            writeln!(output, "{}", json).map_err(|e| CliError::io(e.to_string()))?;
        }
    }
    output.flush().map_err(|e| CliError::io(e.to_string()))?;
    Ok(replayer.summary())
}

/// Replay a script file (`-` for stdin) against a fresh hub.
pub fn execute_script<W: Write>(
    script: &Path,
    settings: CollabSettings,
    workbook: Option<&str>,
    output: W,
) -> Result<ReplaySummary, CliError> {
    let mut replayer = Replayer::new(settings);
    if let Some(id) = workbook {
        replayer.open_workbook(id)?;
    }

    if script.as_os_str() == "-" {
        return run_script(&mut replayer, io::stdin().lock(), output);
    }
    let file = File::open(script).map_err(|e| CliError::io(format!("{}: {}", script.display(), e)))?;
    run_script(&mut replayer, BufReader::new(file), output)
}
