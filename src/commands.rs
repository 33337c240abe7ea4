//! Command execution.

use crate::{Commands, ResCommands};
use bytes::Bytes;
use colored::Colorize;
use nmx_client::{
    Cmd, CmdResult, DeleteResCmd, EchoCmd, GetResCmd, PostResCmd, PutResCmd, ResetCmd, Session,
    TestPepCmd, TxOptions,
};
use nmx_protocol::{CborMap, CborValue, CoapCode, NmpErr};
use serde_json::Value;

/// Executes a command and returns the formatted output.
pub async fn execute(
    s: &dyn Session,
    opts: &TxOptions,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Echo { text } => {
            let mut cmd = EchoCmd::new();
            cmd.payload = text;
            cmd.set_tx_options(*opts);
            let res = cmd.run(s).await?;
            check_rc(res.status())?;
            Ok(res.rsp.payload)
        }

        Commands::TestPep { text } => {
            let mut cmd = TestPepCmd::new();
            cmd.payload = text;
            cmd.set_tx_options(*opts);
            let res = cmd.run(s).await?;
            check_rc(res.status())?;
            Ok(res.rsp.payload)
        }

        Commands::Reset => {
            let mut cmd = ResetCmd::new();
            cmd.set_tx_options(*opts);
            let res = cmd.run(s).await?;
            check_rc(res.status())?;
            Ok("Done".green().to_string())
        }

        Commands::Res { cmd } => execute_res(s, opts, cmd).await,
    }
}

async fn execute_res(
    s: &dyn Session,
    opts: &TxOptions,
    cmd: ResCommands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        ResCommands::Get { path } => {
            let mut cmd = GetResCmd::new(&path);
            cmd.set_tx_options(*opts);
            let res = cmd.run(s).await?;
            let body = if res.value.is_empty() {
                String::new()
            } else {
                match res.value_map() {
                    Ok(map) => format_map(&map),
                    Err(_) => format!("{:02x?}", res.value.as_ref()),
                }
            };
            Ok(format_res(&path, res.code, res.status(), &body))
        }

        ResCommands::Put { path, value } => {
            let map = json_to_map(&parse_json_arg(&value)?)?;
            let mut cmd = PutResCmd::new(&path, map);
            cmd.set_tx_options(*opts);
            let res = cmd.run(s).await?;
            let body = if res.value.is_empty() {
                String::new()
            } else {
                format_map(&res.value)
            };
            Ok(format_res(&path, res.code, res.status(), &body))
        }

        ResCommands::Post { path, data } => {
            let data = match data.strip_prefix('@') {
                Some(file) => Bytes::from(std::fs::read(file)?),
                None => Bytes::from(data.into_bytes()),
            };
            let mut cmd = PostResCmd::new(&path, data);
            cmd.set_tx_options(*opts);
            let res = cmd.run(s).await?;
            let body = String::from_utf8_lossy(&res.value).into_owned();
            Ok(format_res(&path, res.code, res.status(), &body))
        }

        ResCommands::Delete { path } => {
            let mut cmd = DeleteResCmd::new(&path);
            cmd.set_tx_options(*opts);
            let res = cmd.run(s).await?;
            Ok(format_res(&path, res.code, res.status(), ""))
        }
    }
}

/// Turns a non-zero device return code into an error.
fn check_rc(rc: i32) -> Result<(), Box<dyn std::error::Error>> {
    if rc == 0 {
        return Ok(());
    }
    let msg = match NmpErr::from_rc(rc) {
        Some(err) => format!("device returned rc={} ({})", rc, err),
        None => format!("device returned rc={}", rc),
    };
    Err(msg.into())
}

fn format_res(path: &str, code: CoapCode, status: i32, body: &str) -> String {
    let code = if status == 0 {
        code.to_string().green()
    } else {
        code.to_string().red()
    };
    if body.is_empty() {
        format!("{} {}", path.cyan(), code)
    } else {
        format!("{} {}\n{}", path.cyan(), code, body)
    }
}

/// Parses a JSON argument (either inline JSON or @file.json).
fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

fn json_to_map(value: &Value) -> Result<CborMap, Box<dyn std::error::Error>> {
    match json_to_cbor(value)? {
        CborValue::Map(map) => Ok(map),
        other => Err(format!("expected a JSON object, got {}", other.kind()).into()),
    }
}

fn json_to_cbor(value: &Value) -> Result<CborValue, Box<dyn std::error::Error>> {
    let v = match value {
        Value::Null => CborValue::Null,
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => CborValue::Integer(i),
            None => return Err(format!("unsupported number: {}", n).into()),
        },
        Value::String(s) => CborValue::Text(s.clone()),
        Value::Array(items) => CborValue::Array(
            items
                .iter()
                .map(json_to_cbor)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(obj) => {
            let mut map = CborMap::new();
            for (k, v) in obj {
                map.insert(k.as_str(), json_to_cbor(v)?);
            }
            CborValue::Map(map)
        }
    };
    Ok(v)
}

/// Formats a map for display.
fn format_map(map: &CborMap) -> String {
    serde_json::to_string_pretty(map).unwrap_or_else(|_| format!("{:?}", map))
}
