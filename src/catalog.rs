//! Task catalog: named task kinds and their argument schemas.
//!
//! Every kind declares its arguments once (name, type, required or not,
//! optional variadic tail). [`shape`] validates a raw argument list
//! against that schema and builds the typed payload. Nothing here touches
//! queues or the ledger.

use base64::Engine as _;
use base64::prelude::BASE64_STANDARD;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::fleet::parse_wait_time;
use crate::model::{
    CommandPayload, Direction, FileTransferPayload, Payload, ShellcodeMethod, ShellcodePayload,
    TaskKind,
};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    /// Any string.
    Text,
    /// Signed 64-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    Count,
    /// Process ID on the worker.
    Pid,
    /// Standard base64.
    Base64,
    /// Path to a readable file on the server.
    LocalFile,
    /// Duration such as `30s` or `1m30s`.
    Duration,
    /// Shellcode execution method.
    Method,
}

#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub ty: ArgType,
    pub required: bool,
}

const fn req(name: &'static str, ty: ArgType) -> ArgSpec {
    ArgSpec {
        name,
        ty,
        required: true,
    }
}

const fn opt(name: &'static str, ty: ArgType) -> ArgSpec {
    ArgSpec {
        name,
        ty,
        required: false,
    }
}

/// Argument layout of a kind.
#[derive(Debug, Clone, Copy)]
pub enum Args {
    Fixed(&'static [ArgSpec]),
    /// Fixed head followed by any number of `tail` values.
    Variadic(&'static [ArgSpec], ArgSpec),
    /// Layout chosen by the execution method in the first position.
    ByMethod {
        local: &'static [ArgSpec],
        remote: &'static [ArgSpec],
    },
}

#[derive(Debug, Clone, Copy)]
pub struct KindSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: TaskKind,
    pub args: Args,
    pub summary: &'static str,
}

impl KindSpec {
    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    /// Usage line, e.g. `sleep <duration>`.
    pub fn usage(&self) -> String {
        let mut parts = vec![self.name.to_string()];
        let render = |spec: &ArgSpec| {
            if spec.required {
                format!("<{}>", spec.name)
            } else {
                format!("[{}]", spec.name)
            }
        };
        match self.args {
            Args::Fixed(specs) => parts.extend(specs.iter().map(render)),
            Args::Variadic(head, tail) => {
                parts.extend(head.iter().map(render));
                parts.push(format!("[{}...]", tail.name));
            }
            Args::ByMethod { remote, .. } => {
                parts.push("<method>".to_string());
                parts.push("[pid]".to_string());
                parts.extend(remote.iter().skip(2).map(render));
            }
        }
        parts.join(" ")
    }
}

const NONE: &[ArgSpec] = &[];
const SHELLCODE_LOCAL: &[ArgSpec] = &[req("method", ArgType::Method), req("bytes", ArgType::Base64)];
const SHELLCODE_REMOTE: &[ArgSpec] = &[
    req("method", ArgType::Method),
    req("pid", ArgType::Pid),
    req("bytes", ArgType::Base64),
];

pub static CATALOG: &[KindSpec] = &[
    KindSpec {
        name: "cmd",
        aliases: &["command", "shell"],
        kind: TaskKind::Command,
        args: Args::Variadic(&[req("executable", ArgType::Text)], opt("args", ArgType::Text)),
        summary: "run an executable on the worker",
    },
    KindSpec {
        name: "shellcode",
        aliases: &[],
        kind: TaskKind::Shellcode,
        args: Args::ByMethod {
            local: SHELLCODE_LOCAL,
            remote: SHELLCODE_REMOTE,
        },
        summary: "execute base64 shellcode in-process or in a target process",
    },
    KindSpec {
        name: "upload",
        aliases: &[],
        kind: TaskKind::FileTransfer,
        args: Args::Fixed(&[req("local", ArgType::LocalFile), req("remote", ArgType::Text)]),
        summary: "send a server-side file to the worker",
    },
    KindSpec {
        name: "download",
        aliases: &[],
        kind: TaskKind::FileTransfer,
        args: Args::Fixed(&[req("remote", ArgType::Text)]),
        summary: "fetch a file from the worker",
    },
    KindSpec {
        name: "agentInfo",
        aliases: &[],
        kind: TaskKind::Control,
        args: Args::Fixed(NONE),
        summary: "ask the worker to report its configuration",
    },
    KindSpec {
        name: "initialize",
        aliases: &[],
        kind: TaskKind::Control,
        args: Args::Fixed(NONE),
        summary: "ask the worker to re-register",
    },
    KindSpec {
        name: "kill",
        aliases: &["exit"],
        kind: TaskKind::Control,
        args: Args::Fixed(NONE),
        summary: "stop the worker",
    },
    KindSpec {
        name: "sleep",
        aliases: &[],
        kind: TaskKind::Control,
        args: Args::Fixed(&[req("duration", ArgType::Duration)]),
        summary: "set the checkin interval",
    },
    KindSpec {
        name: "skew",
        aliases: &[],
        kind: TaskKind::Control,
        args: Args::Fixed(&[req("skew", ArgType::Int)]),
        summary: "set the checkin jitter in milliseconds",
    },
    KindSpec {
        name: "padding",
        aliases: &[],
        kind: TaskKind::Control,
        args: Args::Fixed(&[req("size", ArgType::Count)]),
        summary: "set the maximum message padding",
    },
    KindSpec {
        name: "maxretry",
        aliases: &[],
        kind: TaskKind::Control,
        args: Args::Fixed(&[req("retries", ArgType::Count)]),
        summary: "set how many failed checkins the worker tolerates",
    },
    KindSpec {
        name: "killdate",
        aliases: &[],
        kind: TaskKind::Control,
        args: Args::Fixed(&[req("epoch", ArgType::Int)]),
        summary: "set the unix time after which the worker exits",
    },
    KindSpec {
        name: "ja3",
        aliases: &[],
        kind: TaskKind::Control,
        args: Args::Fixed(&[req("signature", ArgType::Text)]),
        summary: "set the worker's TLS client fingerprint",
    },
    KindSpec {
        name: "ls",
        aliases: &[],
        kind: TaskKind::Native,
        args: Args::Fixed(&[opt("path", ArgType::Text)]),
        summary: "list a directory",
    },
    KindSpec {
        name: "cd",
        aliases: &[],
        kind: TaskKind::Native,
        args: Args::Fixed(&[req("path", ArgType::Text)]),
        summary: "change the working directory",
    },
    KindSpec {
        name: "pwd",
        aliases: &[],
        kind: TaskKind::Native,
        args: Args::Fixed(NONE),
        summary: "print the working directory",
    },
    KindSpec {
        name: "Minidump",
        aliases: &[],
        kind: TaskKind::Module,
        args: Args::Variadic(NONE, opt("args", ArgType::Text)),
        summary: "run the minidump module",
    },
    KindSpec {
        name: "CreateProcess",
        aliases: &[],
        kind: TaskKind::Module,
        args: Args::Variadic(NONE, opt("args", ArgType::Text)),
        summary: "run the create-process module",
    },
];

pub fn lookup(name: &str) -> Option<&'static KindSpec> {
    CATALOG.iter().find(|spec| spec.name == name).or_else(|| CATALOG.iter().find(|spec| spec.matches(name)))
}

// ---------------------------------------------------------------------------
// Shaping
// ---------------------------------------------------------------------------

/// A validated payload plus lines for the worker's log.
#[derive(Debug, Clone)]
pub struct Shaped {
    pub spec: &'static KindSpec,
    pub payload: Payload,
    pub notes: Vec<String>,
}

impl Shaped {
    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Int(i64),
    Count(u32),
    Method(ShellcodeMethod),
    File { path: String, data: Vec<u8> },
}

impl Value {
    fn text(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Count(n) => n.to_string(),
            Value::Method(m) => m.to_string(),
            Value::File { path, .. } => path.clone(),
        }
    }
}

/// Build the payload for task kind `name` from raw arguments.
pub fn shape<S: AsRef<str>>(name: &str, args: &[S]) -> Result<Shaped> {
    let spec = lookup(name).ok_or_else(|| Error::UnknownKind(name.to_string()))?;
    let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
    let values = validate(spec, &args)?;
    let (payload, notes) = build(spec, values)?;
    Ok(Shaped {
        spec,
        payload,
        notes,
    })
}

fn validate(spec: &KindSpec, args: &[&str]) -> Result<Vec<Value>> {
    let (head, tail) = match spec.args {
        Args::Fixed(specs) => (specs, None),
        Args::Variadic(specs, tail) => (specs, Some(tail)),
        Args::ByMethod { local, remote } => {
            let method = args.first().ok_or_else(|| missing(spec, "method"))?;
            let method = parse_method(spec, method)?;
            (if method.needs_pid() { remote } else { local }, None)
        }
    };

    let required = head.iter().filter(|a| a.required).count();
    if args.len() < required {
        let next = &head[args.len()];
        return Err(missing(spec, next.name));
    }
    if tail.is_none() && args.len() > head.len() {
        return Err(Error::invalid_args(
            spec.name,
            format!(
                "expected at most {} argument(s), received {} (usage: {})",
                head.len(),
                args.len(),
                spec.usage()
            ),
        ));
    }

    args.iter()
        .enumerate()
        .map(|(i, raw)| {
            let arg = head.get(i).or(tail.as_ref()).ok_or_else(|| missing(spec, "argument"))?;
            parse_value(spec, arg, raw)
        })
        .collect()
}

fn missing(spec: &KindSpec, arg: &str) -> Error {
    Error::invalid_args(
        spec.name,
        format!("missing required argument <{arg}> (usage: {})", spec.usage()),
    )
}

fn parse_method(spec: &KindSpec, raw: &str) -> Result<ShellcodeMethod> {
    raw.parse().map_err(|e: String| Error::invalid_args(spec.name, e))
}

fn parse_value(spec: &KindSpec, arg: &ArgSpec, raw: &str) -> Result<Value> {
    let bad = |reason: String| Error::invalid_args(spec.name, format!("<{}>: {reason}", arg.name));
    match arg.ty {
        ArgType::Text => Ok(Value::Text(raw.to_string())),
        ArgType::Int => raw
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| bad(format!("{raw:?} is not an integer: {e}"))),
        ArgType::Count => raw
            .parse::<u32>()
            .map(Value::Count)
            .map_err(|e| bad(format!("{raw:?} is not a non-negative integer: {e}"))),
        ArgType::Pid => match raw.parse::<u32>() {
            Ok(0) => Err(bad("process ID must be non-zero".to_string())),
            Ok(pid) => Ok(Value::Count(pid)),
            Err(e) => Err(bad(format!("{raw:?} is not a process ID: {e}"))),
        },
        ArgType::Base64 => {
            let trimmed = raw.trim();
            BASE64_STANDARD
                .decode(trimmed)
                .map_err(|e| bad(format!("not valid base64: {e}")))?;
            Ok(Value::Text(trimmed.to_string()))
        }
        ArgType::LocalFile => std::fs::read(raw)
            .map(|data| Value::File {
                path: raw.to_string(),
                data,
            })
            .map_err(|e| bad(format!("there was an error reading {raw}: {e}"))),
        ArgType::Duration => parse_wait_time(raw)
            .map(|_| Value::Text(raw.to_string()))
            .map_err(|e| bad(format!("{raw:?} is not a duration: {e}"))),
        ArgType::Method => parse_method(spec, raw).map(Value::Method),
    }
}

fn build(spec: &'static KindSpec, values: Vec<Value>) -> Result<(Payload, Vec<String>)> {
    let mut notes = Vec::new();
    let command_with = |values: &[Value]| CommandPayload {
        command: spec.name.to_string(),
        args: values.iter().map(Value::text).collect(),
    };

    let payload = match spec.kind {
        TaskKind::Command => {
            let mut words = values.iter().map(Value::text);
            Payload::Command(CommandPayload {
                command: words.next().unwrap_or_default(),
                args: words.collect(),
            })
        }
        TaskKind::Control => Payload::Control(command_with(&values)),
        TaskKind::Native => {
            let mut payload = command_with(&values);
            if spec.name == "ls" && payload.args.is_empty() {
                payload.args.push("./".to_string());
            }
            Payload::Native(payload)
        }
        TaskKind::Module => Payload::Module(command_with(&values)),
        TaskKind::Shellcode => {
            let mut method = ShellcodeMethod::Local;
            let mut pid = None;
            let mut bytes = String::new();
            for value in values {
                match value {
                    Value::Method(m) => method = m,
                    Value::Count(p) => pid = Some(p),
                    Value::Text(b) => bytes = b,
                    _ => {}
                }
            }
            Payload::Shellcode(ShellcodePayload { method, bytes, pid })
        }
        TaskKind::FileTransfer => match values.as_slice() {
            [Value::File { path, data }, remote] => {
                let remote = remote.text();
                let digest = Sha256::digest(data);
                notes.push(format!(
                    "Uploading file from server at {path} of size {} bytes and SHA-256: {digest:x} to worker at {remote}",
                    data.len()
                ));
                Payload::FileTransfer(FileTransferPayload {
                    path: remote,
                    blob: Some(BASE64_STANDARD.encode(data)),
                    direction: Direction::ServerToWorker,
                })
            }
            [remote] => {
                let remote = remote.text();
                notes.push(format!("Downloading file from worker at {remote}"));
                Payload::FileTransfer(FileTransferPayload {
                    path: remote,
                    blob: None,
                    direction: Direction::WorkerToServer,
                })
            }
            _ => {
                return Err(Error::invalid_args(
                    spec.name,
                    format!("expected one or two arguments, got {}", values.len()),
                ));
            }
        },
        TaskKind::ServerAck | TaskKind::Results | TaskKind::WorkerInfo => {
            return Err(Error::UnknownKind(spec.name.to_string()));
        }
    };
    Ok((payload, notes))
}
