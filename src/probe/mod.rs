//! Listening-process probe
//!
//! Snapshots which processes are listening on the manager's port range and
//! which deploy each one belongs to. Ownership is inferred from the process's
//! current working directory: a cwd of `.../deploys/<id>` means the process
//! is running deploy `<id>`.
//!
//! Backed by two `lsof` invocations: a listen-only TCP scan over the port
//! range, then one cwd lookup per discovered pid. Both emit tabular text that
//! is parsed leniently; rows that do not parse are skipped.

use std::collections::HashMap;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, warn};

/// A process observed listening on a port in the managed range
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Process {
    pub port: u16,
    pub name: String,
    pub pid: u32,
    /// Deploy id derived from the process's cwd, empty if the cwd is not a
    /// deploy directory
    pub deploy_id: String,
}

/// Find processes listening on TCP ports in `low..=high`.
///
/// `lsof` exits non-zero when nothing matches; that (and `lsof` being
/// unavailable altogether) yields an empty list rather than an error.
pub async fn find_listening(low: u16, high: u16) -> Vec<Process> {
    let port_range = format!(":{}-{}", low, high);
    let output = Command::new("lsof")
        .args(["-P", "-i", &port_range, "-sTCP:LISTEN"])
        .output()
        .await;

    let stdout = match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout).into_owned(),
        Err(e) => {
            warn!("failed to run lsof: {}", e);
            return Vec::new();
        }
    };

    let mut procs = parse_listen_table(&stdout);
    for proc in &mut procs {
        match cwd_of(proc.pid).await {
            Ok(Some(cwd)) => proc.deploy_id = deploy_id_from_cwd(&cwd),
            Ok(None) => debug!("no cwd row for pid {}", proc.pid),
            Err(e) => warn!("failed to look up cwd for pid {}: {}", proc.pid, e),
        }
    }
    procs
}

/// Current working directory of a pid, via `lsof -a -d cwd -p <pid>`.
/// `None` when the process is gone or emits no cwd row.
async fn cwd_of(pid: u32) -> Result<Option<String>, std::io::Error> {
    let output = Command::new("lsof")
        .args(["-a", "-d", "cwd", "-p", &pid.to_string()])
        .output()
        .await?;
    Ok(parse_cwd_table(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse the listen-scan table, skipping the header and any row that does
/// not yield a (name, pid, port) triple.
fn parse_listen_table(text: &str) -> Vec<Process> {
    text.lines()
        .skip(1)
        .filter(|line| !line.is_empty())
        .filter_map(parse_listen_row)
        .collect()
}

/// One row of `lsof -P -i :<range> -sTCP:LISTEN` output, e.g.
///
/// ```text
/// node    4242 dan   21u  IPv6 0xdead  0t0  TCP *:8101 (LISTEN)
/// ```
fn parse_listen_row(line: &str) -> Option<Process> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let name = words.first()?;
    let pid: u32 = words.get(1)?.parse().ok()?;
    // The NAME column holds `<addr>:<port>`; the address may itself contain
    // colons (IPv6), so take everything after the last one.
    let port: u16 = words.get(8)?.rsplit(':').next()?.parse().ok()?;
    Some(Process {
        port,
        name: name.to_string(),
        pid,
        deploy_id: String::new(),
    })
}

/// Parse `lsof -a -d cwd -p <pid>` output. The NAME column is last and may
/// contain spaces, so it is sliced by the header's NAME offset rather than
/// split on whitespace.
fn parse_cwd_table(text: &str) -> Option<String> {
    let mut lines = text.lines();
    let header = lines.next()?;
    let fields = lines.next()?;
    let name_index = header.find("NAME")?;
    if fields.len() <= name_index {
        return None;
    }
    Some(fields[name_index..].trim_end().to_string())
}

/// Derive a deploy id from a process cwd: the last path segment, provided
/// its parent directory is named `deploys`.
pub fn deploy_id_from_cwd(cwd: &str) -> String {
    let path = Path::new(cwd);
    let deploy_id = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return String::new(),
    };
    let parent_is_deploys = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        == Some(crate::storage::layout::DEPLOYS_DIR_NAME);
    if parent_is_deploys {
        deploy_id.to_string()
    } else {
        String::new()
    }
}

/// Index a snapshot by listening port
pub fn by_port(procs: &[Process]) -> HashMap<u16, Process> {
    procs.iter().map(|p| (p.port, p.clone())).collect()
}

/// Index a snapshot by pid
pub fn by_pid(procs: &[Process]) -> HashMap<u32, Process> {
    procs.iter().map(|p| (p.pid, p.clone())).collect()
}

/// Index a snapshot by derived deploy id (processes with no deploy id are
/// dropped)
pub fn by_deploy_id(procs: &[Process]) -> HashMap<String, Process> {
    procs
        .iter()
        .filter(|p| !p.deploy_id.is_empty())
        .map(|p| (p.deploy_id.clone(), p.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTEN_OUTPUT: &str = "\
COMMAND   PID USER   FD   TYPE             DEVICE SIZE/OFF NODE NAME
node    12345  dan   21u  IPv4 0x8badf00d        0t0  TCP *:8101 (LISTEN)
node    12346  dan   21u  IPv6 0xdeadbeef        0t0  TCP [::1]:8102 (LISTEN)
haproxy   999  dan    6u  IPv4 0xcafebabe        0t0  TCP 127.0.0.1:8199 (LISTEN)
";

    #[test]
    fn parses_listen_rows() {
        let procs = parse_listen_table(LISTEN_OUTPUT);
        assert_eq!(procs.len(), 3);
        assert_eq!(
            procs[0],
            Process {
                port: 8101,
                name: "node".to_string(),
                pid: 12345,
                deploy_id: String::new(),
            }
        );
        assert_eq!(procs[1].port, 8102);
        assert_eq!(procs[2].name, "haproxy");
        assert_eq!(procs[2].port, 8199);
    }

    #[test]
    fn empty_output_yields_empty_list() {
        assert!(parse_listen_table("").is_empty());
        assert!(parse_listen_table("COMMAND   PID USER\n").is_empty());
    }

    #[test]
    fn skips_unparseable_rows() {
        let text = "\
COMMAND   PID USER   FD   TYPE DEVICE SIZE/OFF NODE NAME
node    not-a-pid dan 21u IPv4 0x0 0t0 TCP *:8101 (LISTEN)
truncated row
node    12345  dan   21u  IPv4 0x0 0t0  TCP *:8101 (LISTEN)
";
        let procs = parse_listen_table(text);
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].pid, 12345);
    }

    #[test]
    fn parses_cwd_table_with_spaces_in_path() {
        let text = "\
COMMAND  PID USER   FD   TYPE DEVICE SIZE/OFF     NODE NAME
node   12345  dan  cwd    DIR    1,4      448 12345678 /srv/my app/deploys/amber-oslo-2026-08-02-10-00-00
";
        let cwd = parse_cwd_table(text).unwrap();
        assert_eq!(cwd, "/srv/my app/deploys/amber-oslo-2026-08-02-10-00-00");
    }

    #[test]
    fn cwd_table_requires_name_header() {
        assert_eq!(parse_cwd_table("garbage\nrow\n"), None);
        assert_eq!(parse_cwd_table(""), None);
    }

    #[test]
    fn derives_deploy_id_only_under_deploys_dir() {
        assert_eq!(
            deploy_id_from_cwd("/srv/app/deploys/amber-oslo-2026-08-02-10-00-00"),
            "amber-oslo-2026-08-02-10-00-00"
        );
        assert_eq!(deploy_id_from_cwd("/srv/app/other/amber-oslo"), "");
        assert_eq!(deploy_id_from_cwd("/"), "");
        assert_eq!(deploy_id_from_cwd(""), "");
    }

    #[test]
    fn indexes_snapshot() {
        let procs = parse_listen_table(LISTEN_OUTPUT);
        assert_eq!(by_port(&procs).len(), 3);
        assert_eq!(by_pid(&procs)[&12345].port, 8101);
        // No cwd lookups ran, so nothing has a deploy id.
        assert!(by_deploy_id(&procs).is_empty());
    }
}
