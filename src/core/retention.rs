/// Retention policy and the restic `forget` arguments it maps to

/// Keep-N-per-period configuration for `restic forget`.
///
/// Snapshots are grouped by path and tag so every service's history is
/// thinned out on its own, independent of how often other services run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_last: Option<u32>,
    pub keep_hourly: Option<u32>,
    pub keep_daily: Option<u32>,
    pub keep_weekly: Option<u32>,
    pub keep_monthly: Option<u32>,
    pub keep_yearly: Option<u32>,
    /// Snapshots carrying any of these tags are never forgotten
    pub keep_tags: Vec<String>,
    /// Only snapshots carrying these tags are considered
    pub filter_tags: Vec<String>,
}

impl RetentionPolicy {
    /// (period, count) pairs in restic's flag order
    pub fn periods(&self) -> [(&'static str, Option<u32>); 6] {
        [
            ("last", self.keep_last),
            ("hourly", self.keep_hourly),
            ("daily", self.keep_daily),
            ("weekly", self.keep_weekly),
            ("monthly", self.keep_monthly),
            ("yearly", self.keep_yearly),
        ]
    }

    /// Whether any keep rule is configured at all
    pub fn has_rules(&self) -> bool {
        self.periods().iter().any(|(_, count)| count.is_some()) || !self.keep_tags.is_empty()
    }

    /// Arguments for `restic forget` (without the repository flags)
    pub fn forget_args(&self) -> Vec<String> {
        let mut args = vec![
            "forget".to_string(),
            "--group-by".to_string(),
            "paths,tags".to_string(),
        ];

        for (period, count) in self.periods() {
            if let Some(count) = count {
                args.push(format!("--keep-{}", period));
                args.push(count.to_string());
            }
        }

        for tag in &self.keep_tags {
            args.push("--keep-tag".to_string());
            args.push(tag.clone());
        }

        for tag in &self.filter_tags {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }

        args
    }
}
