use crate::info::DeviceInfo;

#[derive(Debug, Clone, Default)]
pub struct State {
    pub started_at_unix: i64,
    pub snapshot: Option<DeviceInfo>,
    pub snapshot_count: u64,
}

impl State {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started_at_unix: now_unix,
            ..Self::default()
        }
    }

    pub fn update_snapshot(&mut self, snapshot: DeviceInfo) {
        self.snapshot_count = self.snapshot_count.saturating_add(1);
        self.snapshot = Some(snapshot);
    }

    pub fn last_collect_unix(&self) -> i64 {
        self.snapshot
            .as_ref()
            .map(|s| s.collected_at_unix)
            .unwrap_or(0)
    }
}
