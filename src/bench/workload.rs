use std::sync::atomic::{AtomicU64, Ordering};

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::Rng;

use crate::bench::{BenchError, Operation, OperationKind, Record, Workload};
use crate::properties::Properties;

pub const DEFAULT_TABLE: &str = "usertable";

/// Relative weights of the measured-phase operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationMix {
    pub read: f64,
    pub update: f64,
    pub insert: f64,
    pub scan: f64,
    pub delete: f64,
}

impl Default for OperationMix {
    fn default() -> Self {
        Self {
            read: 0.95,
            update: 0.05,
            insert: 0.0,
            scan: 0.0,
            delete: 0.0,
        }
    }
}

impl OperationMix {
    fn weights(&self) -> [(f64, OperationKind); 5] {
        [
            (self.read, OperationKind::Read),
            (self.update, OperationKind::Update),
            (self.insert, OperationKind::Insert),
            (self.scan, OperationKind::Scan),
            (self.delete, OperationKind::Delete),
        ]
    }

    fn validate(&self) -> Result<(), BenchError> {
        let weights = self.weights().map(|(weight, _)| weight);
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(BenchError::Init(
                "operation proportions must be non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(BenchError::Init(
                "operation proportions must not all be zero".to_string(),
            ));
        }
        Ok(())
    }

    fn choose(&self, rng: &mut StdRng) -> OperationKind {
        let weights = self.weights();
        let total: f64 = weights.iter().map(|(weight, _)| weight).sum();
        let mut point = rng.gen::<f64>() * total;
        for (weight, kind) in weights {
            if point < weight {
                return kind;
            }
            point -= weight;
        }
        // Rounding left a sliver past the end; use the last enabled kind.
        weights
            .iter()
            .rev()
            .find(|(weight, _)| *weight > 0.0)
            .map_or(OperationKind::Read, |(_, kind)| *kind)
    }
}

/// The `core` workload: a single table of `recordcount` records with
/// `fieldcount` fields each, exercised by a weighted operation mix.
#[derive(Debug)]
pub struct CoreWorkload {
    table: String,
    record_count: u64,
    operation_count: u64,
    field_count: u64,
    field_length: usize,
    max_scan_length: usize,
    mix: OperationMix,
    /// Next key to insert; keys below it exist once the load phase is done.
    insert_cursor: AtomicU64,
}

impl CoreWorkload {
    pub fn from_properties(props: &Properties) -> Result<Self, BenchError> {
        let mix = OperationMix {
            read: props.get_f64("readproportion", 0.95)?,
            update: props.get_f64("updateproportion", 0.05)?,
            insert: props.get_f64("insertproportion", 0.0)?,
            scan: props.get_f64("scanproportion", 0.0)?,
            delete: props.get_f64("deleteproportion", 0.0)?,
        };
        mix.validate()?;

        let record_count = props.get_u64("recordcount", 1000)?;
        let field_count = props.get_u64("fieldcount", 10)?;
        if field_count == 0 {
            return Err(BenchError::Init("fieldcount must be positive".to_string()));
        }

        Ok(Self {
            table: props.get_or("table", DEFAULT_TABLE).to_string(),
            record_count,
            operation_count: props.get_u64("operationcount", 1000)?,
            field_count,
            field_length: props.get_u64("fieldlength", 100)? as usize,
            max_scan_length: props.get_u64("maxscanlength", 100)?.max(1) as usize,
            mix,
            insert_cursor: AtomicU64::new(record_count),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn mix(&self) -> OperationMix {
        self.mix
    }

    fn key(seq: u64) -> String {
        format!("user{seq:012}")
    }

    fn values(&self, rng: &mut StdRng) -> Record {
        (0..self.field_count)
            .map(|i| {
                let value: Vec<u8> = std::iter::repeat_with(|| rng.sample(Alphanumeric))
                    .take(self.field_length)
                    .collect();
                (format!("field{i}"), value)
            })
            .collect()
    }

    /// A key that exists, or record 0 when nothing has been loaded.
    fn existing_key(&self, rng: &mut StdRng) -> String {
        let upper = self.insert_cursor.load(Ordering::Relaxed);
        if upper == 0 {
            return Self::key(0);
        }
        Self::key(rng.gen_range(0..upper))
    }
}

impl Workload for CoreWorkload {
    fn name(&self) -> &str {
        "core"
    }

    fn record_count(&self) -> u64 {
        self.record_count
    }

    fn operation_count(&self) -> u64 {
        self.operation_count
    }

    fn load_operation(&self, seq: u64, rng: &mut StdRng) -> Operation {
        Operation::Insert {
            table: self.table.clone(),
            key: Self::key(seq),
            values: self.values(rng),
        }
    }

    fn next_operation(&self, rng: &mut StdRng) -> Operation {
        let table = self.table.clone();
        match self.mix.choose(rng) {
            OperationKind::Update => Operation::Update {
                table,
                key: self.existing_key(rng),
                values: self.values(rng),
            },
            OperationKind::Insert => Operation::Insert {
                table,
                key: Self::key(self.insert_cursor.fetch_add(1, Ordering::Relaxed)),
                values: self.values(rng),
            },
            OperationKind::Scan => Operation::Scan {
                table,
                start_key: self.existing_key(rng),
                count: rng.gen_range(1..=self.max_scan_length),
            },
            OperationKind::Delete => Operation::Delete {
                table,
                key: self.existing_key(rng),
            },
            OperationKind::Read => Operation::Read {
                table,
                key: self.existing_key(rng),
            },
        }
    }
}
