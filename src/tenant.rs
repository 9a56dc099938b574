use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::compactor;
use crate::directory::MemoryDirectory;
use crate::engine::{Engine, EngineConfig};
use crate::limits::*;
use crate::notify::NotifyHub;

/// One institution's booking engine and the directory it admits against.
pub struct Tenant {
    pub engine: Arc<Engine>,
    pub directory: Arc<MemoryDirectory>,
}

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL +
/// directory snapshot + compactor.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    tenants: DashMap<String, Arc<Tenant>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    engine_config: EngineConfig,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, engine_config: EngineConfig) -> Self {
        Self {
            tenants: DashMap::new(),
            data_dir,
            compact_threshold,
            engine_config,
        }
    }

    /// Get or lazily create the tenant for a database name.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Tenant>> {
        if let Some(existing) = self.tenants.get(tenant) {
            return Ok(existing.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // Keep the name usable as a file stem inside data_dir.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
        }

        // Two first connections may race to here; the entry decides which one is kept.
        let entry = match self.tenants.entry(tenant.to_string()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => e,
        };

        let directory_path = self.data_dir.join(format!("{safe_name}.directory.json"));
        let directory = Arc::new(MemoryDirectory::open(&directory_path).map_err(io::Error::other)?);
        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify, directory.clone(), self.engine_config)?);

        tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));

        let created = Arc::new(Tenant { engine, directory });
        entry.insert(created.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        tracing::info!("opened tenant {safe_name}");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Directory, Role, UserRecord};
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tutorbook_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(dir, 1000, EngineConfig::default())
    }

    fn professor(id: Ulid) -> UserRecord {
        UserRecord {
            id,
            display_name: "Dr. Okafor".into(),
            role: Role::Professor,
        }
    }

    fn monday_window(professor_id: Ulid) -> WeeklyAvailability {
        WeeklyAvailability {
            id: Ulid::new(),
            professor_id,
            subject: "Physics".into(),
            modality: Modality::Online,
            location: None,
            day_of_week: "monday".into(),
            start_time: "09:00".into(),
            end_time: "10:00".into(),
            active: true,
        }
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = manager(dir);

        let a = tm.get_or_create("tenant_a").unwrap();
        let b = tm.get_or_create("tenant_b").unwrap();

        let pid = Ulid::new();
        a.directory.upsert_user(professor(pid)).unwrap();

        a.engine.add_availability(monday_window(pid)).await.unwrap();
        assert_eq!(a.engine.list_availability(pid, false).await.len(), 1);

        // Tenant B has neither the user nor the window.
        assert!(b.directory.get_user(pid).await.is_none());
        assert!(b.engine.list_availability(pid, false).await.is_empty());
        assert!(b.engine.add_availability(monday_window(pid)).await.is_err());
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _tenant = tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn directory_snapshot_survives_reopen() {
        let dir = test_data_dir("snapshot");
        let pid = Ulid::new();
        {
            let tm = manager(dir.clone());
            let t = tm.get_or_create("campus").unwrap();
            t.directory.upsert_user(professor(pid)).unwrap();
        }
        assert!(dir.join("campus.directory.json").exists());

        let tm = manager(dir);
        let t = tm.get_or_create("campus").unwrap();
        assert_eq!(t.directory.get_user(pid).await, Some(professor(pid)));
    }

    #[tokio::test]
    async fn tenant_same_instance_returned() {
        let dir = test_data_dir("same_tenant");
        let tm = manager(dir);

        let t1 = tm.get_or_create("foo").unwrap();
        let t2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&t1, &t2));
        assert!(Arc::ptr_eq(&t1.engine, &t2.engine));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = manager(dir.clone());

        let _tenant = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        assert!(tm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = manager(dir);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = manager(dir);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
