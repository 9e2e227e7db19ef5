//! `fs.*` method handlers.
//!
//! Synchronous filesystem operations running directly in the core loop.
//! Listings skip permission-denied subpaths instead of erroring; data
//! transfer goes through the binary blob protocol (`fs.pread` pushes a
//! server-minted blob, `fs.pwrite` consumes a client-uploaded one).

use std::fs;
use std::os::unix::fs::{FileExt, FileTypeExt, MetadataExt};
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::rpc::frame::{self, MAX_BINARY_PACKET};
use crate::rpc::Dispatcher;

use super::{str_param, u64_param, u32_param};

/// Register the `fs.*` namespace.
pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register("fs.ls", |_state, _client, params| {
        let path = str_param(params, 0)?;
        list_dir(Path::new(path)).map(Value::Array)
    });

    dispatcher.register("fs.tree", |_state, _client, params| {
        let path = str_param(params, 0)?;
        tree(Path::new(path)).map(Value::Array)
    });

    dispatcher.register("fs.pread", |state, client, params| {
        let path = str_param(params, 0)?;
        let offset = u64_param(params, 1)?;
        let size = u64_param(params, 2)? as usize;
        if size == 0 || size > MAX_BINARY_PACKET {
            bail!("size must be 1..={MAX_BINARY_PACKET}");
        }
        let file = fs::File::open(path).with_context(|| format!("open {path}"))?;
        let mut buf = vec![0u8; size];
        let read = file
            .read_at(&mut buf, offset)
            .with_context(|| format!("pread {path}"))?;
        if read == 0 {
            return Ok(json!({ "blob": null }));
        }
        let id = state.alloc_blob_id();
        state.send_binary(client, frame::encode_blob(id, &buf[..read]));
        Ok(json!({ "blob": id }))
    });

    dispatcher.register("fs.pwrite", |state, client, params| {
        let path = str_param(params, 0)?;
        let offset = u64_param(params, 1)?;
        let blob = u32_param(params, 2)?;
        let data = state.mux.consume_blob(client, blob)?;
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("open {path}"))?;
        file.write_all_at(&data, offset)
            .with_context(|| format!("pwrite {path}"))?;
        Ok(json!(data.len()))
    });

    dispatcher.register("fs.copy", |_state, _client, params| {
        let src = str_param(params, 0)?;
        let dst = str_param(params, 1)?;
        let options = match params.get(2) {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| anyhow!("params[2]: expected copy options object"))?,
            None => CopyOptions::default(),
        };
        copy_path(Path::new(src), Path::new(dst), options)?;
        Ok(Value::Null)
    });

    dispatcher.register("fs.symlink", |_state, _client, params| {
        let path = str_param(params, 0)?;
        let target = str_param(params, 1)?;
        std::os::unix::fs::symlink(target, path)
            .with_context(|| format!("symlink {path} -> {target}"))?;
        Ok(Value::Null)
    });

    dispatcher.register("fs.hardlink", |_state, _client, params| {
        let path = str_param(params, 0)?;
        let target = str_param(params, 1)?;
        fs::hard_link(target, path)
            .with_context(|| format!("hardlink {path} -> {target}"))?;
        Ok(Value::Null)
    });

    dispatcher.register("fs.mkdir", |_state, _client, params| {
        let path = str_param(params, 0)?;
        let created = !Path::new(path).exists();
        fs::create_dir_all(path).with_context(|| format!("mkdir {path}"))?;
        Ok(json!(created))
    });

    dispatcher.register("fs.realpath", |_state, _client, params| {
        let path = str_param(params, 0)?;
        let resolved = fs::canonicalize(path).with_context(|| format!("realpath {path}"))?;
        Ok(json!(resolved))
    });

    dispatcher.register("fs.resize", |_state, _client, params| {
        let path = str_param(params, 0)?;
        let size = u64_param(params, 1)?;
        let file = fs::OpenOptions::new()
            .write(true)
            .open(path)
            .with_context(|| format!("open {path}"))?;
        file.set_len(size).with_context(|| format!("resize {path}"))?;
        Ok(Value::Null)
    });

    dispatcher.register("fs.remove", |_state, _client, params| {
        let path = str_param(params, 0)?;
        remove_all(Path::new(path)).map(|count| json!(count))
    });

    dispatcher.register("fs.exists", |_state, _client, params| {
        let path = str_param(params, 0)?;
        Ok(json!(Path::new(path).exists()))
    });

    dispatcher.register("fs.stat", |_state, _client, params| {
        let path = str_param(params, 0)?;
        let meta = fs::metadata(path).with_context(|| format!("stat {path}"))?;
        Ok(status_json(&meta))
    });

    dispatcher.register("fs.lstat", |_state, _client, params| {
        let path = str_param(params, 0)?;
        let meta = fs::symlink_metadata(path).with_context(|| format!("lstat {path}"))?;
        Ok(status_json(&meta))
    });
}

// ─── Directory listings ────────────────────────────────────────────────────

fn list_dir(path: &Path) -> Result<Vec<Value>> {
    let entries = fs::read_dir(path).with_context(|| format!("ls {}", path.display()))?;
    let mut out = Vec::new();
    for entry in entries.flatten() {
        // Metadata failures (racing deletes, denied subpaths) skip the entry.
        let Ok(meta) = entry.metadata() else { continue };
        out.push(entry_json(&entry.file_name().to_string_lossy(), &meta));
    }
    Ok(out)
}

fn tree(root: &Path) -> Result<Vec<Value>> {
    // The root itself must be listable; denied subpaths are skipped below.
    fs::read_dir(root).with_context(|| format!("tree {}", root.display()))?;
    let mut out = Vec::new();
    walk(root, root, &mut out);
    Ok(out)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<Value>) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        let name = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();
        out.push(entry_json(&name, &meta));
        // DirEntry::metadata does not follow symlinks, so links to
        // directories are listed but never descended into.
        if meta.is_dir() {
            walk(root, &path, out);
        }
    }
}

fn entry_json(name: &str, meta: &fs::Metadata) -> Value {
    json!({
        "name": name,
        "type": type_tag(meta.file_type()),
        "perm": meta.mode() & 0o7777,
        "link": meta.nlink(),
        "time": mtime_ms(meta),
    })
}

fn status_json(meta: &fs::Metadata) -> Value {
    json!({
        "type": type_tag(meta.file_type()),
        "perm": meta.mode() & 0o7777,
    })
}

fn type_tag(file_type: fs::FileType) -> &'static str {
    if file_type.is_dir() {
        "dir"
    } else if file_type.is_file() {
        "file"
    } else if file_type.is_symlink() {
        "symlink"
    } else if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_socket() {
        "socket"
    } else if file_type.is_char_device() {
        "char"
    } else if file_type.is_block_device() {
        "block"
    } else {
        "unknown"
    }
}

fn mtime_ms(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis() as u64)
}

// ─── Copy ──────────────────────────────────────────────────────────────────

/// `fs.copy` option set; all default false.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct CopyOptions {
    pub skip_existing: bool,
    pub overwrite_existing: bool,
    pub update_existing: bool,
    pub recursive: bool,
    pub copy_symlinks: bool,
    pub skip_symlinks: bool,
    pub directories_only: bool,
    pub create_symlinks: bool,
    pub create_hard_links: bool,
}

fn copy_path(src: &Path, dst: &Path, opts: CopyOptions) -> Result<()> {
    let meta = fs::symlink_metadata(src).with_context(|| format!("copy {}", src.display()))?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        if opts.skip_symlinks {
            return Ok(());
        }
        if opts.copy_symlinks {
            let target = fs::read_link(src)?;
            std::os::unix::fs::symlink(&target, dst)
                .with_context(|| format!("copy symlink to {}", dst.display()))?;
            return Ok(());
        }
        // Follow the link and copy whatever it points at.
        let followed = fs::metadata(src).with_context(|| format!("copy {}", src.display()))?;
        if followed.is_dir() {
            bail!("copy {}: cannot follow symlink to directory", src.display());
        }
        return copy_file(src, dst, opts);
    }

    if file_type.is_dir() {
        return copy_dir(src, dst, opts);
    }

    if opts.directories_only {
        return Ok(());
    }
    copy_file(src, dst, opts)
}

fn copy_file(src: &Path, dst: &Path, opts: CopyOptions) -> Result<()> {
    if fs::symlink_metadata(dst).is_ok() {
        if opts.skip_existing {
            return Ok(());
        }
        if opts.update_existing {
            let src_mtime = fs::metadata(src)?.modified()?;
            let dst_mtime = fs::metadata(dst)?.modified()?;
            if src_mtime <= dst_mtime {
                return Ok(());
            }
        } else if !opts.overwrite_existing {
            bail!("copy: destination {} exists", dst.display());
        }
        // Link creation cannot overwrite in place.
        if opts.create_symlinks || opts.create_hard_links {
            let _ = fs::remove_file(dst);
        }
    }

    if opts.create_symlinks {
        std::os::unix::fs::symlink(src, dst)
            .with_context(|| format!("create symlink {}", dst.display()))?;
    } else if opts.create_hard_links {
        fs::hard_link(src, dst).with_context(|| format!("create hard link {}", dst.display()))?;
    } else {
        fs::copy(src, dst)
            .with_context(|| format!("copy {} -> {}", src.display(), dst.display()))?;
    }
    Ok(())
}

fn copy_dir(src: &Path, dst: &Path, opts: CopyOptions) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read {}", src.display()))?.flatten() {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if opts.recursive {
                copy_dir(&from, &to, opts)?;
            }
        } else {
            copy_path(&from, &to, opts)?;
        }
    }
    Ok(())
}

// ─── Recursive remove ──────────────────────────────────────────────────────

/// Remove `path` recursively, returning the number of entries removed.
fn remove_all(path: &Path) -> Result<u64> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err).with_context(|| format!("remove {}", path.display())),
    };
    if meta.is_dir() {
        let mut count = 0;
        for entry in fs::read_dir(path).with_context(|| format!("read {}", path.display()))?.flatten() {
            count += remove_all(&entry.path())?;
        }
        fs::remove_dir(path).with_context(|| format!("remove {}", path.display()))?;
        Ok(count + 1)
    } else {
        fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        Ok(1)
    }
}
