// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The directory/file tree the name server owns.
//!
//! Nodes are keyed by cleaned absolute path. Files carry their chunk
//! list and the pending set of chunks not yet confirmed; a file with
//! pending chunks is hidden from listings. Removal is a soft delete:
//! the tombstone stays, the name disappears.
//!
//! Every mutation appends one record to an on-disk journal
//! (`version\tcommand\targ...`); every `snapshot_every` mutations the
//! tree is snapshotted and the journal truncated. On boot the snapshot
//! is loaded and the journal replayed on top.

use super::error::{Error, Result};
use crate::protocol::ChunkId;

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::{debug, info, warn};

const SNAPSHOT_FILE: &str = "tree.snapshot";
const JOURNAL_FILE: &str = "tree.journal";

/// Collapses `.`/`..`/empty segments into a rooted absolute path.
pub fn clean_path(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                let _ = parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_owned(),
        Some(idx) => path[..idx].to_owned(),
        None => "/".to_owned(),
    }
}

fn base_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NsNode {
    path: String,
    is_dir: bool,
    parent: String,
    children: BTreeSet<String>,
    removed: bool,
    chunks: Vec<ChunkId>,
    pending: HashSet<ChunkId>,
}

impl NsNode {
    fn dir(path: String, parent: String) -> Self {
        Self {
            path,
            is_dir: true,
            parent,
            children: BTreeSet::new(),
            removed: false,
            chunks: Vec::new(),
            pending: HashSet::new(),
        }
    }

    fn file(path: String, parent: String) -> Self {
        Self {
            is_dir: false,
            ..Self::dir(path, parent)
        }
    }
}

/// A read-only view of one file's chunk bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct FileView {
    pub path: String,
    pub chunks: Vec<ChunkId>,
    pub pending: HashSet<ChunkId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TreeSnapshot {
    version: u64,
    nodes: BTreeMap<String, NsNode>,
}

struct Persist {
    journal_path: PathBuf,
    snapshot_path: PathBuf,
    snapshot_every: usize,
    journal: File,
    ops_since_snapshot: usize,
}

struct Inner {
    nodes: BTreeMap<String, NsNode>,
    version: u64,
    persist: Option<Persist>,
}

/// The namespace tree. One lock guards the nodes and the journal
/// handle together, so records land in mutation order.
pub struct Namespace {
    inner: Mutex<Inner>,
}

fn fresh_nodes() -> BTreeMap<String, NsNode> {
    BTreeMap::from([("/".to_owned(), NsNode::dir("/".to_owned(), String::new()))])
}

impl Namespace {
    /// A tree that lives only in memory. Used by tests and ephemeral
    /// deployments.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                nodes: fresh_nodes(),
                version: 0,
                persist: None,
            }),
        }
    }

    /// Opens (or creates) a persisted tree under `dir`: loads the
    /// snapshot if any, replays the journal on top, and keeps
    /// journaling from there.
    pub fn open(dir: impl AsRef<Path>, snapshot_every: usize) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let journal_path = dir.join(JOURNAL_FILE);

        let (mut nodes, mut version) = if snapshot_path.exists() {
            let file = File::open(&snapshot_path)?;
            let snapshot: TreeSnapshot = bincode::deserialize_from(file)
                .map_err(|error| Error::CorruptPersistence(error.to_string()))?;
            info!(
                "Loaded namespace snapshot at version {}",
                snapshot.version
            );
            (snapshot.nodes, snapshot.version)
        } else {
            (fresh_nodes(), 0)
        };

        if journal_path.exists() {
            let reader = BufReader::new(File::open(&journal_path)?);
            let mut replayed = 0usize;
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let (line_version, cmd, args) = parse_journal_line(&line)?;
                if line_version <= version {
                    continue;
                }
                if let Err(error) = apply(&mut nodes, cmd, &args) {
                    warn!("Skipping unreplayable journal record {line_version}: {error}");
                } else {
                    replayed += 1;
                }
                version = line_version;
            }
            if replayed > 0 {
                info!("Replayed {replayed} journal records up to version {version}");
            }
        }

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)?;

        Ok(Self {
            inner: Mutex::new(Inner {
                nodes,
                version,
                persist: Some(Persist {
                    journal_path,
                    snapshot_path,
                    snapshot_every,
                    journal,
                    ops_since_snapshot: 0,
                }),
            }),
        })
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Drops everything and starts over from an empty root.
    pub fn init(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.nodes = fresh_nodes();
        inner.record("init", &[])
    }

    pub fn create_file(&self, path: &str) -> Result<String> {
        let path = clean_path(path);
        let mut inner = self.lock();
        apply_touch(&mut inner.nodes, &path)?;
        inner.record("touch", &[&path])?;
        Ok(path)
    }

    pub fn create_directory(&self, path: &str) -> Result<String> {
        let path = clean_path(path);
        let mut inner = self.lock();
        apply_mkdir(&mut inner.nodes, &path)?;
        inner.record("mkdir", &[&path])?;
        Ok(path)
    }

    /// Detaches a file and hands back its chunks for purging.
    pub fn remove_file(&self, path: &str) -> Result<Vec<ChunkId>> {
        let path = clean_path(path);
        let mut inner = self.lock();
        let chunks = apply_rmfile(&mut inner.nodes, &path)?;
        inner.record("rmfile", &[&path])?;
        Ok(chunks)
    }

    pub fn remove_directory(&self, path: &str) -> Result<()> {
        let path = clean_path(path);
        let mut inner = self.lock();
        apply_rmdir(&mut inner.nodes, &path)?;
        inner.record("rmdir", &[&path])
    }

    pub fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (clean_path(from), clean_path(to));
        let mut inner = self.lock();
        apply_mv(&mut inner.nodes, &from, &to)?;
        inner.record("mv", &[&from, &to])
    }

    /// Copies a file node. The copy references the same chunks; the
    /// chunk table keeps them alive for whichever path goes last.
    pub fn copy_file(&self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (clean_path(from), clean_path(to));
        let mut inner = self.lock();
        apply_cp(&mut inner.nodes, &from, &to)?;
        inner.record("cp", &[&from, &to])
    }

    /// Books the planned chunk list of a freshly planned upload. All
    /// chunks start pending.
    pub fn attach_chunks(&self, path: &str, ids: &[ChunkId]) -> Result<()> {
        let path = clean_path(path);
        let joined = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut inner = self.lock();
        apply_chunks(&mut inner.nodes, &path, ids)?;
        inner.record("chunks", &[&path, &joined])
    }

    /// Clears one pending mark once the chunk is confirmed somewhere.
    pub fn confirm_chunk(&self, path: &str, id: &ChunkId) -> Result<()> {
        let path = clean_path(path);
        let mut inner = self.lock();
        apply_confirm(&mut inner.nodes, &path, id)?;
        inner.record("confirm", &[&path, &id.to_string()])
    }

    pub fn get_file(&self, path: &str) -> Result<FileView> {
        let path = clean_path(path);
        let inner = self.lock();
        let node = live_node(&inner.nodes, &path)
            .ok_or_else(|| Error::Namespace(format!("file does not exist: {path}")))?;
        if node.is_dir {
            return Err(Error::Namespace(format!("not a file: {path}")));
        }
        Ok(FileView {
            path: node.path.clone(),
            chunks: node.chunks.clone(),
            pending: node.pending.clone(),
        })
    }

    /// Children of a directory (or the file itself), hiding tombstones
    /// and files that are still pending-only.
    pub fn ls(&self, path: &str) -> Result<Vec<String>> {
        let path = clean_path(path);
        let inner = self.lock();
        let node = live_node(&inner.nodes, &path)
            .ok_or_else(|| Error::Namespace(format!("path does not exist: {path}")))?;
        if !node.is_dir {
            return Ok(vec![base_of(&node.path).to_owned()]);
        }
        let mut listed = Vec::new();
        for name in &node.children {
            let child_path = if node.path == "/" {
                format!("/{name}")
            } else {
                format!("{}/{name}", node.path)
            };
            let Some(child) = live_node(&inner.nodes, &child_path) else {
                continue;
            };
            if !child.is_dir && !child.pending.is_empty() {
                continue;
            }
            listed.push(name.clone());
        }
        Ok(listed)
    }

    pub fn cd(&self, path: &str) -> Result<String> {
        let path = clean_path(path);
        let inner = self.lock();
        let node = live_node(&inner.nodes, &path)
            .ok_or_else(|| Error::Namespace(format!("directory does not exist: {path}")))?;
        if !node.is_dir {
            return Err(Error::Namespace(format!("not a directory: {path}")));
        }
        Ok(path)
    }

    pub fn info(&self, path: &str) -> Result<Vec<String>> {
        let path = clean_path(path);
        let inner = self.lock();
        let node = live_node(&inner.nodes, &path)
            .ok_or_else(|| Error::Namespace(format!("path does not exist: {path}")))?;
        let mut info = vec![
            format!("path: {}", node.path),
            format!("kind: {}", if node.is_dir { "directory" } else { "file" }),
        ];
        if node.is_dir {
            info.push(format!("entries: {}", node.children.len()));
        } else {
            info.push(format!("chunks: {}", node.chunks.len()));
            info.push(format!("pending: {}", node.pending.len()));
        }
        Ok(info)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("poisoned namespace lock")
    }
}

impl Inner {
    /// Journals one applied mutation and snapshots every
    /// `snapshot_every` records.
    fn record(&mut self, cmd: &str, args: &[&str]) -> Result<()> {
        self.version += 1;
        let version = self.version;
        let Some(persist) = self.persist.as_mut() else {
            return Ok(());
        };
        let mut line = format!("{version}\t{cmd}");
        for arg in args {
            line.push('\t');
            line.push_str(arg);
        }
        line.push('\n');
        persist.journal.write_all(line.as_bytes())?;
        persist.journal.flush()?;
        persist.ops_since_snapshot += 1;

        if persist.ops_since_snapshot >= persist.snapshot_every {
            let snapshot = TreeSnapshot {
                version,
                nodes: self.nodes.clone(),
            };
            let tmp = persist.snapshot_path.with_extension("tmp");
            let file = File::create(&tmp)?;
            bincode::serialize_into(file, &snapshot)
                .map_err(|error| Error::CorruptPersistence(error.to_string()))?;
            std::fs::rename(&tmp, &persist.snapshot_path)?;
            // Truncate the journal; everything is in the snapshot now.
            persist.journal = File::create(&persist.journal_path)?;
            persist.ops_since_snapshot = 0;
            debug!("Namespace snapshotted at version {version}");
        }
        Ok(())
    }
}

fn live_node<'a>(nodes: &'a BTreeMap<String, NsNode>, path: &str) -> Option<&'a NsNode> {
    nodes.get(path).filter(|node| !node.removed)
}

fn parse_journal_line(line: &str) -> Result<(u64, &str, Vec<&str>)> {
    let mut fields = line.split('\t');
    let version = fields
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::CorruptPersistence(format!("bad journal line: {line}")))?;
    let cmd = fields
        .next()
        .ok_or_else(|| Error::CorruptPersistence(format!("bad journal line: {line}")))?;
    Ok((version, cmd, fields.collect()))
}

fn apply(nodes: &mut BTreeMap<String, NsNode>, cmd: &str, args: &[&str]) -> Result<()> {
    let arg = |i: usize| -> Result<&str> {
        args.get(i)
            .copied()
            .ok_or_else(|| Error::CorruptPersistence(format!("{cmd}: missing argument {i}")))
    };
    match cmd {
        "init" => {
            *nodes = fresh_nodes();
            Ok(())
        }
        "touch" => apply_touch(nodes, arg(0)?),
        "mkdir" => apply_mkdir(nodes, arg(0)?),
        "rmfile" => apply_rmfile(nodes, arg(0)?).map(|_| ()),
        "rmdir" => apply_rmdir(nodes, arg(0)?),
        "mv" => apply_mv(nodes, arg(0)?, arg(1)?),
        "cp" => apply_cp(nodes, arg(0)?, arg(1)?),
        "chunks" => {
            let ids = parse_chunk_list(arg(1)?)?;
            apply_chunks(nodes, arg(0)?, &ids)
        }
        "confirm" => {
            let id = arg(1)?
                .parse()
                .map_err(|_| Error::CorruptPersistence(format!("bad chunk id in: {cmd}")))?;
            apply_confirm(nodes, arg(0)?, &id)
        }
        other => Err(Error::CorruptPersistence(format!(
            "unknown journal command: {other}"
        ))),
    }
}

fn parse_chunk_list(raw: &str) -> Result<Vec<ChunkId>> {
    raw.split(',')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse()
                .map_err(|_| Error::CorruptPersistence(format!("bad chunk id: {part}")))
        })
        .collect()
}

fn require_parent_dir<'a>(
    nodes: &'a BTreeMap<String, NsNode>,
    path: &str,
) -> Result<&'a NsNode> {
    let parent = parent_of(path);
    match live_node(nodes, &parent) {
        Some(node) if node.is_dir => Ok(node),
        Some(_) => Err(Error::Namespace(format!("not a directory: {parent}"))),
        None => Err(Error::Namespace(format!(
            "the parent directory does not exist: {parent}"
        ))),
    }
}

fn apply_touch(nodes: &mut BTreeMap<String, NsNode>, path: &str) -> Result<()> {
    if live_node(nodes, path).is_some() {
        return Err(Error::Namespace(format!("the path already exists: {path}")));
    }
    let parent = require_parent_dir(nodes, path)?.path.clone();
    let name = base_of(path).to_owned();
    let _ = nodes.insert(path.to_owned(), NsNode::file(path.to_owned(), parent.clone()));
    if let Some(dir) = nodes.get_mut(&parent) {
        let _ = dir.children.insert(name);
    }
    Ok(())
}

fn apply_mkdir(nodes: &mut BTreeMap<String, NsNode>, path: &str) -> Result<()> {
    if live_node(nodes, path).is_some() {
        return Err(Error::Namespace(format!("the path already exists: {path}")));
    }
    let parent = require_parent_dir(nodes, path)?.path.clone();
    let name = base_of(path).to_owned();
    let _ = nodes.insert(path.to_owned(), NsNode::dir(path.to_owned(), parent.clone()));
    if let Some(dir) = nodes.get_mut(&parent) {
        let _ = dir.children.insert(name);
    }
    Ok(())
}

fn apply_rmfile(nodes: &mut BTreeMap<String, NsNode>, path: &str) -> Result<Vec<ChunkId>> {
    let node = live_node(nodes, path)
        .ok_or_else(|| Error::Namespace(format!("file does not exist: {path}")))?;
    if node.is_dir {
        return Err(Error::Namespace(format!("cannot remove directory: {path}")));
    }
    let parent = node.parent.clone();
    let chunks = node.chunks.clone();
    if let Some(node) = nodes.get_mut(path) {
        node.removed = true;
    }
    let name = base_of(path).to_owned();
    if let Some(dir) = nodes.get_mut(&parent) {
        let _ = dir.children.remove(&name);
    }
    Ok(chunks)
}

fn apply_rmdir(nodes: &mut BTreeMap<String, NsNode>, path: &str) -> Result<()> {
    if path == "/" {
        return Err(Error::Namespace("cannot remove the root".to_owned()));
    }
    let node = live_node(nodes, path)
        .ok_or_else(|| Error::Namespace(format!("directory does not exist: {path}")))?;
    if !node.is_dir {
        return Err(Error::Namespace(format!("not a directory: {path}")));
    }
    let live_children = node
        .children
        .iter()
        .filter(|name| {
            let child_path = if path == "/" {
                format!("/{name}")
            } else {
                format!("{path}/{name}")
            };
            live_node(nodes, &child_path).is_some()
        })
        .count();
    if live_children > 0 {
        return Err(Error::Namespace(format!("directory is not empty: {path}")));
    }
    let parent = node.parent.clone();
    if let Some(node) = nodes.get_mut(path) {
        node.removed = true;
    }
    let name = base_of(path).to_owned();
    if let Some(dir) = nodes.get_mut(&parent) {
        let _ = dir.children.remove(&name);
    }
    Ok(())
}

fn apply_mv(nodes: &mut BTreeMap<String, NsNode>, from: &str, to: &str) -> Result<()> {
    let node = live_node(nodes, from)
        .ok_or_else(|| Error::Namespace(format!("file does not exist: {from}")))?;
    if node.is_dir {
        return Err(Error::Namespace(format!("cannot move directory: {from}")));
    }
    if live_node(nodes, to).is_some() {
        return Err(Error::Namespace(format!("the path already exists: {to}")));
    }
    let new_parent = require_parent_dir(nodes, to)?.path.clone();

    let mut moved = nodes
        .get(from)
        .cloned()
        .ok_or_else(|| Error::Namespace(format!("file does not exist: {from}")))?;
    let old_parent = moved.parent.clone();
    moved.path = to.to_owned();
    moved.parent = new_parent.clone();

    if let Some(node) = nodes.get_mut(from) {
        node.removed = true;
    }
    let old_name = base_of(from).to_owned();
    if let Some(dir) = nodes.get_mut(&old_parent) {
        let _ = dir.children.remove(&old_name);
    }
    let new_name = base_of(to).to_owned();
    let _ = nodes.insert(to.to_owned(), moved);
    if let Some(dir) = nodes.get_mut(&new_parent) {
        let _ = dir.children.insert(new_name);
    }
    Ok(())
}

fn apply_cp(nodes: &mut BTreeMap<String, NsNode>, from: &str, to: &str) -> Result<()> {
    let node = live_node(nodes, from)
        .ok_or_else(|| Error::Namespace(format!("file does not exist: {from}")))?;
    if node.is_dir {
        return Err(Error::Namespace(format!("cannot copy directory: {from}")));
    }
    if live_node(nodes, to).is_some() {
        return Err(Error::Namespace(format!("the path already exists: {to}")));
    }
    let new_parent = require_parent_dir(nodes, to)?.path.clone();

    let mut copy = nodes
        .get(from)
        .cloned()
        .ok_or_else(|| Error::Namespace(format!("file does not exist: {from}")))?;
    copy.path = to.to_owned();
    copy.parent = new_parent.clone();
    copy.removed = false;

    let new_name = base_of(to).to_owned();
    let _ = nodes.insert(to.to_owned(), copy);
    if let Some(dir) = nodes.get_mut(&new_parent) {
        let _ = dir.children.insert(new_name);
    }
    Ok(())
}

fn apply_chunks(
    nodes: &mut BTreeMap<String, NsNode>,
    path: &str,
    ids: &[ChunkId],
) -> Result<()> {
    let node = nodes
        .get_mut(path)
        .filter(|node| !node.removed)
        .ok_or_else(|| Error::Namespace(format!("file does not exist: {path}")))?;
    if node.is_dir {
        return Err(Error::Namespace(format!("not a file: {path}")));
    }
    node.chunks.extend_from_slice(ids);
    node.pending.extend(ids.iter().copied());
    Ok(())
}

fn apply_confirm(
    nodes: &mut BTreeMap<String, NsNode>,
    path: &str,
    id: &ChunkId,
) -> Result<()> {
    let node = nodes
        .get_mut(path)
        .filter(|node| !node.removed)
        .ok_or_else(|| Error::Namespace(format!("file does not exist: {path}")))?;
    let _ = node.pending.remove(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use eyre::Result;

    #[test]
    fn paths_are_cleaned() {
        assert_eq!(clean_path("/a/b/../c/./d"), "/a/c/d");
        assert_eq!(clean_path("foo//bar"), "/foo/bar");
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("/../.."), "/");
    }

    #[test]
    fn create_requires_a_parent_directory() {
        let tree = Namespace::in_memory();

        assert_matches!(tree.create_file("/no/such/dir/file"), Err(Error::Namespace(_)));

        tree.create_directory("/docs").unwrap();
        tree.create_file("/docs/readme").unwrap();
        assert_matches!(tree.create_file("/docs/readme"), Err(Error::Namespace(_)));

        assert_eq!(tree.ls("/docs").unwrap(), vec!["readme".to_owned()]);
    }

    #[test]
    fn pending_files_are_hidden_until_confirmed() -> Result<()> {
        let tree = Namespace::in_memory();
        tree.create_file("/upload")?;
        let ids: Vec<ChunkId> = (0..2).map(|_| ChunkId::new()).collect();
        tree.attach_chunks("/upload", &ids)?;

        assert!(tree.ls("/")?.is_empty());

        tree.confirm_chunk("/upload", &ids[0])?;
        assert!(tree.ls("/")?.is_empty());

        tree.confirm_chunk("/upload", &ids[1])?;
        assert_eq!(tree.ls("/")?, vec!["upload".to_owned()]);

        let view = tree.get_file("/upload")?;
        assert_eq!(view.chunks, ids);
        assert!(view.pending.is_empty());
        Ok(())
    }

    #[test]
    fn remove_file_returns_its_chunks_and_hides_the_name() -> Result<()> {
        let tree = Namespace::in_memory();
        tree.create_file("/victim")?;
        let ids: Vec<ChunkId> = (0..3).map(|_| ChunkId::new()).collect();
        tree.attach_chunks("/victim", &ids)?;
        for id in &ids {
            tree.confirm_chunk("/victim", id)?;
        }

        let purged = tree.remove_file("/victim")?;
        assert_eq!(purged, ids);
        assert!(tree.get_file("/victim").is_err());
        assert!(tree.ls("/")?.is_empty());

        // The name can be taken again.
        tree.create_file("/victim")?;
        assert!(tree.get_file("/victim")?.chunks.is_empty());
        Ok(())
    }

    #[test]
    fn rmdir_refuses_non_empty_directories() -> Result<()> {
        let tree = Namespace::in_memory();
        tree.create_directory("/full")?;
        tree.create_file("/full/occupant")?;

        assert_matches!(tree.remove_directory("/full"), Err(Error::Namespace(_)));

        let _ = tree.remove_file("/full/occupant")?;
        tree.remove_directory("/full")?;
        assert_matches!(tree.cd("/full"), Err(Error::Namespace(_)));
        Ok(())
    }

    #[test]
    fn move_rekeys_a_file() -> Result<()> {
        let tree = Namespace::in_memory();
        tree.create_directory("/a")?;
        tree.create_directory("/b")?;
        tree.create_file("/a/f")?;
        let ids = vec![ChunkId::new()];
        tree.attach_chunks("/a/f", &ids)?;
        tree.confirm_chunk("/a/f", &ids[0])?;

        tree.move_file("/a/f", "/b/g")?;
        assert!(tree.get_file("/a/f").is_err());
        assert_eq!(tree.get_file("/b/g")?.chunks, ids);
        assert_eq!(tree.ls("/a")?, Vec::<String>::new());
        assert_eq!(tree.ls("/b")?, vec!["g".to_owned()]);
        Ok(())
    }

    #[test]
    fn journal_replay_rebuilds_the_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ids: Vec<ChunkId> = (0..2).map(|_| ChunkId::new()).collect();

        {
            let tree = Namespace::open(dir.path(), 1000)?;
            tree.create_directory("/a")?;
            tree.create_file("/a/f")?;
            tree.attach_chunks("/a/f", &ids)?;
            tree.confirm_chunk("/a/f", &ids[0])?;
            tree.create_file("/other")?;
            let _ = tree.remove_file("/other")?;
        }

        let reborn = Namespace::open(dir.path(), 1000)?;
        let view = reborn.get_file("/a/f")?;
        assert_eq!(view.chunks, ids);
        assert_eq!(view.pending, HashSet::from([ids[1]]));
        assert!(reborn.get_file("/other").is_err());
        assert_eq!(reborn.ls("/")?, vec!["a".to_owned()]);
        Ok(())
    }

    #[test]
    fn snapshot_truncates_the_journal_and_still_rebuilds() -> Result<()> {
        let dir = tempfile::tempdir()?;

        {
            // Snapshot after every second mutation.
            let tree = Namespace::open(dir.path(), 2)?;
            tree.create_directory("/a")?;
            tree.create_directory("/b")?;
            tree.create_file("/b/tail")?;
        }

        let journal = std::fs::read_to_string(dir.path().join(JOURNAL_FILE))?;
        // Only the post-snapshot tail remains journaled.
        assert_eq!(journal.lines().count(), 1);

        let reborn = Namespace::open(dir.path(), 2)?;
        let mut listing = reborn.ls("/")?;
        listing.sort();
        assert_eq!(listing, vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(reborn.ls("/b")?, vec!["tail".to_owned()]);
        Ok(())
    }
}
