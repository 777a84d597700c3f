//! Common fixtures for agent tests: a fake btrfs/exportfs toolchain
//! served through a recording [`MockRunner`].
//!
//! The fake keeps an in-memory export table and a configurable qgroup
//! reading, and materializes subvolume create/delete/snapshot as plain
//! directory operations so the engine's on-disk layout is real.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cowshed_exec::MockRunner;

/// Shared state of the fake toolchain.
#[derive(Default)]
pub struct FakeState {
    /// The live export table as `(path, client)` pairs, in table order.
    pub exports: Mutex<Vec<(String, String)>>,
    /// Referenced bytes served by the fake qgroup table.
    pub referenced: AtomicU64,
    /// Exclusive bytes served by the fake qgroup table.
    pub exclusive: AtomicU64,
    /// When set, `qgroup limit` invocations fail.
    pub fail_qgroup_limit: AtomicBool,
}

impl FakeState {
    /// Seeds a live export without going through the engine.
    pub fn add_export(&self, path: &str, client: &str) {
        self.exports
            .lock()
            .unwrap()
            .push((path.to_string(), client.to_string()));
    }

    /// Snapshot of the live export table.
    pub fn export_table(&self) -> Vec<(String, String)> {
        self.exports.lock().unwrap().clone()
    }

    fn handle(&self, bin: &str, args: &[&str]) -> Result<String, String> {
        match bin {
            "chattr" => Ok(String::new()),
            "exportfs" => self.handle_exportfs(args),
            _ => self.handle_btrfs(args),
        }
    }

    fn handle_btrfs(&self, args: &[&str]) -> Result<String, String> {
        match args {
            ["--version"] => Ok("btrfs-progs v6.8".to_string()),
            ["subvolume", "create", path] => {
                std::fs::create_dir_all(path).map_err(|e| e.to_string())?;
                Ok(String::new())
            }
            ["subvolume", "delete", path] => {
                if !Path::new(path).exists() {
                    return Err(format!(
                        "ERROR: Could not destroy subvolume/snapshot: {path}: No such file or directory"
                    ));
                }
                std::fs::remove_dir_all(path).map_err(|e| e.to_string())?;
                Ok(String::new())
            }
            ["subvolume", "snapshot", "-r", _src, dst]
            | ["subvolume", "snapshot", _src, dst] => {
                std::fs::create_dir_all(dst).map_err(|e| e.to_string())?;
                Ok(String::new())
            }
            ["subvolume", "show", path] => {
                if Path::new(path).exists() {
                    Ok(format!("{path}\n\tName:\t\t\tdata\n\tSubvolume ID:\t\t256\n"))
                } else {
                    Err(format!("ERROR: not a subvolume: {path}"))
                }
            }
            ["qgroup", "show", "-re", "--raw", _path] => Ok(format!(
                "qgroupid         rfer         excl\n\
                 --------         ----         ----\n\
                 0/256 {} {}\n",
                self.referenced.load(Ordering::SeqCst),
                self.exclusive.load(Ordering::SeqCst),
            )),
            ["qgroup", "show", _path] => Ok("qgroupid rfer excl\n".to_string()),
            ["qgroup", "limit", _bytes, _path] => {
                if self.fail_qgroup_limit.load(Ordering::SeqCst) {
                    Err("ERROR: unable to limit requested quota group".to_string())
                } else {
                    Ok(String::new())
                }
            }
            ["property", "set", ..] => Ok(String::new()),
            other => Err(format!("unexpected btrfs invocation: {other:?}")),
        }
    }

    fn handle_exportfs(&self, args: &[&str]) -> Result<String, String> {
        match args {
            ["-v"] => {
                let exports = self.exports.lock().unwrap();
                let mut out = String::new();
                for (path, client) in exports.iter() {
                    out.push_str(&format!("{path}\t{client}(rw,no_subtree_check)\n"));
                }
                Ok(out)
            }
            ["-o", _opts, target] => {
                let (client, path) = split_target(target)?;
                let mut exports = self.exports.lock().unwrap();
                if !exports.iter().any(|(p, c)| *p == path && *c == client) {
                    exports.push((path, client));
                }
                Ok(String::new())
            }
            ["-u", target] => {
                let (client, path) = split_target(target)?;
                let mut exports = self.exports.lock().unwrap();
                let before = exports.len();
                exports.retain(|(p, c)| !(*p == path && *c == client));
                if exports.len() == before {
                    return Err(format!("exportfs: Could not find {target} to unexport."));
                }
                Ok(String::new())
            }
            other => Err(format!("unexpected exportfs invocation: {other:?}")),
        }
    }
}

fn split_target(target: &str) -> Result<(String, String), String> {
    match target.split_once(':') {
        Some((client, path)) => Ok((client.to_string(), path.to_string())),
        None => Err(format!("exportfs: malformed target {target}")),
    }
}

/// Builds the fake toolchain: a recording runner plus its shared state.
pub fn fake_tools() -> (Arc<MockRunner>, Arc<FakeState>) {
    let state = Arc::new(FakeState::default());
    let handler_state = Arc::clone(&state);
    let runner = Arc::new(MockRunner::with_handler(move |bin, args| {
        handler_state.handle(bin, args)
    }));
    (runner, state)
}
