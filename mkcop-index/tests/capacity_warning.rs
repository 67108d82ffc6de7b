use log::{Level, LevelFilter, Log, Metadata, Record};
use mkcop_index::{MkCoPTree, TreeSettings, VectorRelation};
use parking_lot::Mutex;

/// Keeps every warning emitted by this crate.
struct CapturingLogger {
    warnings: Mutex<Vec<String>>,
}

impl Log for CapturingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn && metadata.target().starts_with("mkcop_index")
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.warnings.lock().push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger {
    warnings: parking_lot::const_mutex(Vec::new()),
};

fn take_warnings() -> Vec<String> {
    std::mem::take(&mut *LOGGER.warnings.lock())
}

// One test per binary: the logger is process-wide.
#[test]
fn test_small_capacities_are_reported() {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(LevelFilter::Warn);

    MkCoPTree::in_memory(TreeSettings::new(4), VectorRelation::default()).unwrap();
    assert!(take_warnings().is_empty());

    MkCoPTree::in_memory(
        TreeSettings::new(4).capacities(20, 6),
        VectorRelation::default(),
    )
    .unwrap();
    let warnings = take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("leaf capacity is only 6"));

    // 512 byte pages fit 8 entries of either kind
    TreeSettings::new(4).page_size(512).validate().unwrap();
    let warnings = take_warnings();
    assert_eq!(warnings.len(), 2);
    assert!(warnings[0].contains("directory capacity is only 8"));
    assert!(warnings[1].contains("leaf capacity is only 8"));
}
