//! Reader for a `/proc`-style process table.
//!
//! Every path is resolved relative to a configurable root so discovery can run
//! against a fake table in tests.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, TimeZone, Utc};

/// TCP socket state `LISTEN` as printed by the kernel.
const TCP_LISTEN: &str = "0A";

/// Parsed subset of `/proc/<pid>/stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    pub pgrp: i32,
    /// User and system time in clock ticks.
    pub utime: u64,
    pub stime: u64,
    /// Process start in clock ticks after boot.
    pub start_ticks: u64,
}

/// Parsed subset of `/proc/<pid>/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcOwner {
    pub uid: u32,
    pub gid: u32,
    pub rss_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pid_path(&self, pid: u32, file: &str) -> PathBuf {
        self.root.join(pid.to_string()).join(file)
    }

    /// Numeric entries of the root, ascending.
    pub fn pids(&self) -> io::Result<Vec<u32>> {
        let mut pids: Vec<u32> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    pub fn exists(&self, pid: u32) -> bool {
        self.root.join(pid.to_string()).is_dir()
    }

    pub fn stat(&self, pid: u32) -> io::Result<ProcStat> {
        let raw = fs::read_to_string(self.pid_path(pid, "stat"))?;
        parse_stat(&raw).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, format!("malformed stat for {pid}"))
        })
    }

    pub fn cmdline(&self, pid: u32) -> io::Result<Vec<String>> {
        let raw = fs::read(self.pid_path(pid, "cmdline"))?;
        Ok(split_nul(&raw))
    }

    pub fn environ(&self, pid: u32) -> io::Result<BTreeMap<String, String>> {
        let raw = fs::read(self.pid_path(pid, "environ"))?;
        Ok(split_nul(&raw)
            .into_iter()
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                Some((key.to_string(), value.to_string()))
            })
            .collect())
    }

    pub fn cwd(&self, pid: u32) -> io::Result<PathBuf> {
        fs::read_link(self.pid_path(pid, "cwd"))
    }

    pub fn owner(&self, pid: u32) -> io::Result<ProcOwner> {
        let raw = fs::read_to_string(self.pid_path(pid, "status"))?;
        parse_status(&raw).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("status for {pid} has no Uid/Gid lines"),
            )
        })
    }

    /// Seconds since boot.
    pub fn uptime(&self) -> io::Result<f64> {
        let raw = fs::read_to_string(self.root.join("uptime"))?;
        raw.split_whitespace()
            .next()
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed uptime"))
    }

    /// Boot time as a Unix timestamp, from the `btime` line of `stat`.
    pub fn boot_time(&self) -> io::Result<i64> {
        let raw = fs::read_to_string(self.root.join("stat"))?;
        raw.lines()
            .find_map(|line| line.strip_prefix("btime ")?.trim().parse().ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing btime"))
    }

    /// Wall clock start of a process.
    pub fn start_time(&self, stat: &ProcStat) -> io::Result<DateTime<Utc>> {
        let boot = self.boot_time()?;
        let offset_ms = stat.start_ticks.saturating_mul(1000) / clock_ticks();
        Utc.timestamp_opt(boot, 0)
            .single()
            .map(|boot| boot + chrono::Duration::milliseconds(offset_ms as i64))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid btime"))
    }

    /// Average CPU usage over the lifetime of the process.
    pub fn lifetime_cpu_percent(&self, stat: &ProcStat) -> io::Result<f32> {
        let ticks = clock_ticks() as f64;
        let elapsed = self.uptime()? - stat.start_ticks as f64 / ticks;
        if elapsed <= 0.0 {
            return Ok(0.0);
        }
        let busy = (stat.utime + stat.stime) as f64 / ticks;
        Ok((busy / elapsed * 100.0) as f32)
    }

    /// Inodes of sockets held open by a process.
    pub fn socket_inodes(&self, pid: u32) -> io::Result<HashSet<u64>> {
        let mut inodes = HashSet::new();
        for entry in fs::read_dir(self.pid_path(pid, "fd"))? {
            let Ok(entry) = entry else { continue };
            if let Ok(target) = fs::read_link(entry.path())
                && let Some(inode) = parse_socket_link(&target.to_string_lossy())
            {
                inodes.insert(inode);
            }
        }
        Ok(inodes)
    }

    /// Listening TCP sockets (inode to port) visible from the network
    /// namespace of `pid`.
    pub fn listening_sockets(&self, pid: u32) -> io::Result<HashMap<u64, u16>> {
        let mut sockets = HashMap::new();
        let mut found_table = false;
        for table in ["net/tcp", "net/tcp6"] {
            match fs::read_to_string(self.pid_path(pid, table)) {
                Ok(raw) => {
                    found_table = true;
                    sockets.extend(parse_listening_table(&raw));
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        if !found_table {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no tcp tables for {pid}"),
            ));
        }
        Ok(sockets)
    }

    /// Ports a process listens on, ascending and deduplicated.
    pub fn listening_ports(&self, pid: u32) -> io::Result<Vec<u16>> {
        let inodes = self.socket_inodes(pid)?;
        let sockets = self.listening_sockets(pid)?;
        let mut ports: Vec<u16> = sockets
            .into_iter()
            .filter(|(inode, _)| inodes.contains(inode))
            .map(|(_, port)| port)
            .collect();
        ports.sort_unstable();
        ports.dedup();
        Ok(ports)
    }
}

fn clock_ticks() -> u64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as u64 } else { 100 }
}

fn split_nul(raw: &[u8]) -> Vec<String> {
    raw.split(|byte| *byte == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// `comm` may contain spaces and parentheses, so fields are located from the
/// last `)`.
pub fn parse_stat(raw: &str) -> Option<ProcStat> {
    let open = raw.find('(')?;
    let close = raw.rfind(')')?;
    if close < open {
        return None;
    }
    let pid = raw[..open].trim().parse().ok()?;
    let comm = raw[open + 1..close].to_string();
    let rest: Vec<&str> = raw[close + 1..].split_whitespace().collect();

    Some(ProcStat {
        pid,
        comm,
        state: rest.first()?.chars().next()?,
        ppid: rest.get(1)?.parse().ok()?,
        pgrp: rest.get(2)?.parse().ok()?,
        utime: rest.get(11)?.parse().ok()?,
        stime: rest.get(12)?.parse().ok()?,
        start_ticks: rest.get(19)?.parse().ok()?,
    })
}

/// Real uid/gid and resident set size.
pub fn parse_status(raw: &str) -> Option<ProcOwner> {
    let first_number = |value: &str| value.split_whitespace().next()?.parse::<u64>().ok();

    let mut uid = None;
    let mut gid = None;
    let mut rss_kb = 0;
    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key {
            "Uid" => uid = first_number(value),
            "Gid" => gid = first_number(value),
            "VmRSS" => rss_kb = first_number(value).unwrap_or(0),
            _ => {}
        }
    }

    Some(ProcOwner {
        uid: u32::try_from(uid?).ok()?,
        gid: u32::try_from(gid?).ok()?,
        rss_bytes: rss_kb * 1024,
    })
}

/// `socket:[12345]` -> 12345.
pub fn parse_socket_link(target: &str) -> Option<u64> {
    target.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

/// Listening entries of a `net/tcp` or `net/tcp6` table as inode to port.
pub fn parse_listening_table(raw: &str) -> HashMap<u64, u16> {
    raw.lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.get(3)? != &TCP_LISTEN {
                return None;
            }
            let (_, port_hex) = fields.get(1)?.rsplit_once(':')?;
            let port = u16::from_str_radix(port_hex, 16).ok()?;
            let inode = fields.get(9)?.parse().ok()?;
            Some((inode, port))
        })
        .collect()
}
