use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::{Bay, KioskSettings, SettingsFile};

/// 累计投币与授权缓存的持久化结构，对应 account_data.json。
/// 投币总数单调不减，是推送到远端的绝对值来源。
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerTotals {
    #[serde(default)]
    pub water_coins: u64,
    #[serde(default)]
    pub foaming_coins: u64,
    #[serde(default)]
    pub is_authorized: bool,
}

impl LedgerTotals {
    pub fn total_earnings(&self) -> u64 {
        self.water_coins + self.foaming_coins
    }
}

/// 本地账本文件。写入即落盘（先写临时文件再替换），单一写者。
pub struct LedgerStore {
    path: PathBuf,
    totals: LedgerTotals,
}

impl LedgerStore {
    /// 读取账本；文件缺失或损坏时用零值起步，不中断运行。
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let totals = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(totals) => totals,
                Err(err) => {
                    log::warn!("Ledger file unreadable, starting from zero: {}", err);
                    LedgerTotals::default()
                }
            },
            Err(_) => LedgerTotals::default(),
        };
        Self { path, totals }
    }

    pub fn totals(&self) -> LedgerTotals {
        self.totals.clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.totals.is_authorized
    }

    /// 记一笔投币：先改本地，永不等待网络。
    pub fn record_coin(&mut self, bay: Bay, amount: u32) -> io::Result<()> {
        match bay {
            Bay::Water => self.totals.water_coins += u64::from(amount),
            Bay::Foaming => self.totals.foaming_coins += u64::from(amount),
        }
        self.persist()
    }

    /// 缓存远端授权裁定，作为离线时的唯一依据。
    pub fn set_authorized(&mut self, authorized: bool) -> io::Result<()> {
        if self.totals.is_authorized == authorized {
            return Ok(());
        }
        self.totals.is_authorized = authorized;
        self.persist()
    }

    fn persist(&self) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.totals)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        atomic_write(&self.path, &bytes)
    }
}

/// 设置文件（carwash_settings.json），首次运行写出默认值。
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 读取设置；缺失时创建默认文件，损坏时用默认值继续。
    pub fn load(&self) -> KioskSettings {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<SettingsFile>(&bytes) {
                Ok(file) => file.into_settings(),
                Err(err) => {
                    log::warn!("Settings file unreadable, using defaults: {}", err);
                    KioskSettings::default()
                }
            },
            Err(_) => {
                let defaults = KioskSettings::default();
                if let Err(err) = self.save(&defaults) {
                    log::warn!("Could not write default settings: {}", err);
                }
                defaults
            }
        }
    }

    pub fn save(&self, settings: &KioskSettings) -> io::Result<()> {
        let file = SettingsFile::from_settings(settings);
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        atomic_write(&self.path, &bytes)
    }
}

/// 先写临时文件再原子替换，进程中途被杀也不会留下半个文件。
fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("data.json");
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp_path, bytes)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ledger_starts_from_zero_and_accumulates_monotonically() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("account_data.json");
        let mut store = LedgerStore::load(&path);
        assert_eq!(store.totals(), LedgerTotals::default());

        store.record_coin(Bay::Water, 5).expect("record");
        store.record_coin(Bay::Water, 10).expect("record");
        store.record_coin(Bay::Foaming, 5).expect("record");

        let totals = store.totals();
        assert_eq!(totals.water_coins, 15);
        assert_eq!(totals.foaming_coins, 5);
        assert_eq!(totals.total_earnings(), 20);
    }

    #[test]
    fn ledger_survives_reload() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("account_data.json");
        {
            let mut store = LedgerStore::load(&path);
            store.record_coin(Bay::Water, 5).expect("record");
            store.set_authorized(true).expect("set");
        }
        let store = LedgerStore::load(&path);
        assert_eq!(store.totals().water_coins, 5);
        assert!(store.is_authorized());
        // 临时文件不残留
        assert!(!dir.path().join(".account_data.json.tmp").exists());
    }

    #[test]
    fn corrupt_ledger_defaults_instead_of_failing() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("account_data.json");
        fs::write(&path, b"{not json").expect("write");
        let store = LedgerStore::load(&path);
        assert_eq!(store.totals(), LedgerTotals::default());
    }

    #[test]
    fn settings_created_on_first_run_with_defaults() {
        let dir = tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join("carwash_settings.json"));
        let settings = store.load();
        assert_eq!(settings.water_timer_secs, 60);
        assert_eq!(settings.foaming_timer_secs, 60);
        assert!(dir.path().join("carwash_settings.json").exists());
    }

    #[test]
    fn settings_round_trip() {
        let dir = tempdir().expect("tempdir");
        let store = SettingsStore::new(dir.path().join("carwash_settings.json"));
        let mut settings = store.load();
        settings.set_timer(Bay::Foaming, 90);
        store.save(&settings).expect("save");

        let reloaded = store.load();
        assert_eq!(reloaded.foaming_timer_secs, 90);
        assert_eq!(reloaded.water_timer_secs, 60);
    }

    #[test]
    fn corrupt_settings_fall_back_to_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("carwash_settings.json");
        fs::write(&path, b"]]").expect("write");
        let store = SettingsStore::new(&path);
        let settings = store.load();
        assert_eq!(settings.water_timer_secs, 60);
    }
}
