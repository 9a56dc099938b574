use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::limits::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Professor,
    Developer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Professor => "professor",
            Role::Developer => "developer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "student" | "estudiante" => Some(Role::Student),
            "professor" | "profesor" => Some(Role::Professor),
            "developer" | "desarrollador" => Some(Role::Developer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ComputeLab,
    Carrel,
    MeetingRoom,
    Printer3d,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ComputeLab => "compute_lab",
            ResourceKind::Carrel => "carrel",
            ResourceKind::MeetingRoom => "meeting_room",
            ResourceKind::Printer3d => "printer_3d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "compute_lab" | "lab" | "laboratorio" => Some(ResourceKind::ComputeLab),
            "carrel" | "cubiculo" | "cubículo" => Some(ResourceKind::Carrel),
            "meeting_room" | "room" | "sala" => Some(ResourceKind::MeetingRoom),
            "printer_3d" | "3d_printer" | "impresora_3d" => Some(ResourceKind::Printer3d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Ulid,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: Ulid,
    pub name: String,
    pub kind: ResourceKind,
    pub capacity: u32,
    pub location: Option<String>,
    pub active: bool,
}

/// Identity and resource lookups the booking engine depends on.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_user(&self, id: Ulid) -> Option<UserRecord>;
    async fn get_resource(&self, id: Ulid) -> Option<ResourceRecord>;
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory snapshot I/O: {0}")]
    Io(#[from] io::Error),
    #[error("directory snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    users: BTreeMap<Ulid, UserRecord>,
    resources: BTreeMap<Ulid, ResourceRecord>,
}

/// DashMap-backed directory, optionally mirrored to a JSON file.
#[derive(Default)]
pub struct MemoryDirectory {
    users: DashMap<Ulid, UserRecord>,
    resources: DashMap<Ulid, ResourceRecord>,
    snapshot_path: Option<PathBuf>,
    /// Serializes upserts so each snapshot is written whole and in order.
    write_lock: Mutex<()>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path` if it exists; later upserts rewrite it.
    pub fn open(path: &Path) -> Result<Self, DirectoryError> {
        let snapshot = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice::<Snapshot>(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };
        let dir = Self {
            users: snapshot.users.into_iter().collect(),
            resources: snapshot.resources.into_iter().collect(),
            snapshot_path: Some(path.to_path_buf()),
            write_lock: Mutex::new(()),
        };
        tracing::debug!(
            users = dir.users.len(),
            resources = dir.resources.len(),
            "loaded directory snapshot {}",
            path.display()
        );
        Ok(dir)
    }

    /// The change is visible only once the snapshot holding it is on disk.
    pub fn upsert_user(&self, user: UserRecord) -> Result<(), DirectoryError> {
        if user.display_name.len() > MAX_NAME_LEN {
            return Err(DirectoryError::LimitExceeded("display name too long"));
        }
        let _writer = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.users.contains_key(&user.id) && self.users.len() >= MAX_DIRECTORY_ENTRIES {
            return Err(DirectoryError::LimitExceeded("too many users"));
        }
        self.persist(|snapshot| {
            snapshot.users.insert(user.id, user.clone());
        })?;
        self.users.insert(user.id, user);
        Ok(())
    }

    pub fn upsert_resource(&self, resource: ResourceRecord) -> Result<(), DirectoryError> {
        if resource.name.len() > MAX_NAME_LEN {
            return Err(DirectoryError::LimitExceeded("resource name too long"));
        }
        if resource.location.as_ref().is_some_and(|l| l.len() > MAX_LOCATION_LEN) {
            return Err(DirectoryError::LimitExceeded("location too long"));
        }
        let _writer = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.resources.contains_key(&resource.id)
            && self.resources.len() >= MAX_DIRECTORY_ENTRIES
        {
            return Err(DirectoryError::LimitExceeded("too many resources"));
        }
        self.persist(|snapshot| {
            snapshot.resources.insert(resource.id, resource.clone());
        })?;
        self.resources.insert(resource.id, resource);
        Ok(())
    }

    /// Write the current contents with `change` applied. Caller holds `write_lock`.
    fn persist(&self, change: impl FnOnce(&mut Snapshot)) -> Result<(), DirectoryError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let mut snapshot = Snapshot {
            users: self.users.iter().map(|e| (*e.key(), e.value().clone())).collect(),
            resources: self.resources.iter().map(|e| (*e.key(), e.value().clone())).collect(),
        };
        change(&mut snapshot);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn get_user(&self, id: Ulid) -> Option<UserRecord> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    async fn get_resource(&self, id: Ulid) -> Option<ResourceRecord> {
        self.resources.get(&id).map(|e| e.value().clone())
    }
}
