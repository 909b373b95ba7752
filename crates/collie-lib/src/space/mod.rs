//! Search space over RDMA traffic configurations
//!
//! This module provides:
//! - The validated [`Point`] type and its field enumeration
//! - Declarative per-field domains ([`SpaceConfig`])
//! - Random draws, local neighbour moves and baseline projection

mod point;

pub use point::{
    Direction, Field, Initiator, Opcode, Point, PointDraft, QpType, MAX_SGE, VALID_MTUS,
};

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigurationError, InvalidPoint};

/// Attempts at a valid neighbour before falling back to a fresh draw
const NEIGHBOR_ATTEMPTS: usize = 32;

/// Default number of fields a neighbour move may touch
pub const DEFAULT_MAX_PERTURBED_FIELDS: usize = 2;

/// Inclusive integer range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRange {
    pub min: u32,
    pub max: u32,
}

impl IntRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        rng.random_range(self.min..=self.max)
    }
}

/// Declared domain of every field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceConfig {
    pub qp_types: Vec<QpType>,
    pub opcodes: Vec<Opcode>,
    pub directions: Vec<Direction>,
    pub initiators: Vec<Initiator>,
    pub mtus: Vec<u32>,
    pub message_sizes: Vec<u32>,
    pub num_qp: IntRange,
    pub send_batch: IntRange,
    pub recv_batch: IntRange,
    pub burst_size: IntRange,
    pub num_sge: IntRange,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            qp_types: QpType::ALL.to_vec(),
            opcodes: Opcode::ALL.to_vec(),
            directions: Direction::ALL.to_vec(),
            initiators: Initiator::ALL.to_vec(),
            mtus: VALID_MTUS.to_vec(),
            // 64 B .. 1 MiB
            message_sizes: (6..=20).map(|shift| 1u32 << shift).collect(),
            num_qp: IntRange::new(1, 512),
            send_batch: IntRange::new(1, 64),
            recv_batch: IntRange::new(0, 64),
            burst_size: IntRange::new(1, 256),
            num_sge: IntRange::new(1, 4),
        }
    }
}

/// The configuration domain explored by the search
#[derive(Debug, Clone)]
pub struct ParameterSpace {
    config: SpaceConfig,
    /// Transport/opcode pairs that can produce a valid point
    transports: Vec<(QpType, Opcode)>,
}

impl ParameterSpace {
    /// Validate the declared domains and build the space
    pub fn new(config: SpaceConfig) -> Result<Self, ConfigurationError> {
        let non_empty = [
            (Field::QpType, config.qp_types.is_empty()),
            (Field::Opcode, config.opcodes.is_empty()),
            (Field::Direction, config.directions.is_empty()),
            (Field::Initiator, config.initiators.is_empty()),
            (Field::Mtu, config.mtus.is_empty()),
            (Field::MessageSize, config.message_sizes.is_empty()),
        ];
        for (field, empty) in non_empty {
            if empty {
                return Err(ConfigurationError::EmptyDomain(field));
            }
        }

        if let Some(mtu) = config.mtus.iter().find(|m| !VALID_MTUS.contains(m)) {
            return Err(ConfigurationError::Other(format!("unsupported mtu {}", mtu)));
        }
        if config.message_sizes.contains(&0) {
            return Err(ConfigurationError::EmptyDomain(Field::MessageSize));
        }

        for (field, range, floor) in [
            (Field::NumQp, config.num_qp, 1),
            (Field::SendBatch, config.send_batch, 1),
            (Field::RecvBatch, config.recv_batch, 0),
            (Field::BurstSize, config.burst_size, 1),
            (Field::NumSge, config.num_sge, 1),
        ] {
            if range.min > range.max || range.min < floor {
                return Err(ConfigurationError::InvalidRange {
                    field,
                    min: range.min,
                    max: range.max,
                });
            }
        }
        if config.num_sge.max > MAX_SGE {
            return Err(ConfigurationError::InvalidRange {
                field: Field::NumSge,
                min: config.num_sge.min,
                max: config.num_sge.max,
            });
        }

        let largest_message = config.message_sizes.iter().copied().max().unwrap_or(0);
        if largest_message < config.num_sge.min {
            return Err(ConfigurationError::EmptyDomain(Field::NumSge));
        }

        let mut space = Self {
            config,
            transports: Vec::new(),
        };
        space.transports = space.viable_transports();
        if space.transports.is_empty() {
            return Err(ConfigurationError::EmptyDomain(Field::QpType));
        }

        Ok(space)
    }

    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    fn viable_transports(&self) -> Vec<(QpType, Opcode)> {
        let mut pairs = Vec::new();
        for &qp_type in &self.config.qp_types {
            for &opcode in &self.config.opcodes {
                if !qp_type.supports(opcode) {
                    continue;
                }
                if opcode.is_two_sided() && self.config.recv_batch.max == 0 {
                    continue;
                }
                if qp_type == QpType::Ud && self.ud_mtus().is_empty() {
                    continue;
                }
                pairs.push((qp_type, opcode));
            }
        }
        pairs
    }

    /// Message sizes that can be split across the smallest SGE count
    fn usable_sizes(&self, mtu_cap: Option<u32>) -> Vec<u32> {
        self.config
            .message_sizes
            .iter()
            .copied()
            .filter(|s| *s >= self.config.num_sge.min)
            .filter(|s| mtu_cap.map_or(true, |mtu| *s <= mtu))
            .collect()
    }

    /// MTUs for which at least one UD-sized message exists
    fn ud_mtus(&self) -> Vec<u32> {
        self.config
            .mtus
            .iter()
            .copied()
            .filter(|mtu| !self.usable_sizes(Some(*mtu)).is_empty())
            .collect()
    }

    /// Whether every field of `point` lies within its declared domain
    pub fn contains(&self, point: &Point) -> bool {
        let c = &self.config;
        c.qp_types.contains(&point.qp_type())
            && c.opcodes.contains(&point.opcode())
            && c.directions.contains(&point.direction())
            && c.initiators.contains(&point.initiator())
            && c.mtus.contains(&point.mtu())
            && c.message_sizes.contains(&point.message_size())
            && c.num_qp.contains(point.num_qp())
            && c.send_batch.contains(point.send_batch())
            && c.recv_batch.contains(point.recv_batch())
            && c.burst_size.contains(point.burst_size())
            && c.num_sge.contains(point.num_sge())
    }

    /// Draw a random valid configuration
    ///
    /// Fields are drawn in dependency order (transport, then MTU, then
    /// message size, then counts) so the result is valid by construction.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Point {
        let c = &self.config;
        let (qp_type, opcode) = pick(&self.transports, rng);

        let mtu = if qp_type == QpType::Ud {
            pick(&self.ud_mtus(), rng)
        } else {
            pick(&c.mtus, rng)
        };
        let sizes = self.usable_sizes((qp_type == QpType::Ud).then_some(mtu));
        let message_size = pick(&sizes, rng);

        let recv_batch = if opcode.is_two_sided() {
            IntRange::new(c.recv_batch.min.max(1), c.recv_batch.max).draw(rng)
        } else {
            c.recv_batch.draw(rng)
        };
        let sge_cap = c.num_sge.max.min(message_size).min(MAX_SGE);
        let num_sge = IntRange::new(c.num_sge.min, sge_cap).draw(rng);

        let draft = PointDraft {
            qp_type,
            opcode,
            direction: pick(&c.directions, rng),
            initiator: pick(&c.initiators, rng),
            mtu,
            message_size,
            num_qp: c.num_qp.draw(rng),
            send_batch: c.send_batch.draw(rng),
            recv_batch,
            burst_size: c.burst_size.draw(rng),
            num_sge,
        };

        draft.validate().unwrap_or_else(|e| {
            warn!(error = %e, "Constructive draw produced an invalid point, using baseline");
            Point::baseline()
        })
    }

    /// Draw a valid configuration that differs from `point` in at most
    /// `max_fields` fields, falling back to a fresh [`sample`](Self::sample)
    /// when no such neighbour turns up
    pub fn neighbor<R: Rng + ?Sized>(&self, point: &Point, max_fields: usize, rng: &mut R) -> Point {
        self.try_neighbor(point, max_fields, rng).unwrap_or_else(|| {
            debug!(
                attempts = NEIGHBOR_ATTEMPTS,
                "No valid neighbour found, drawing a fresh point"
            );
            self.sample(rng)
        })
    }

    /// A valid point differing from `point` in 1..=`max_fields` fields, or
    /// `None` after a bounded number of attempts
    pub fn try_neighbor<R: Rng + ?Sized>(
        &self,
        point: &Point,
        max_fields: usize,
        rng: &mut R,
    ) -> Option<Point> {
        let max_fields = max_fields.clamp(1, Field::ALL.len());
        let mut fields = Field::ALL.to_vec();

        for _ in 0..NEIGHBOR_ATTEMPTS {
            let count = rng.random_range(1..=max_fields);
            fields.shuffle(rng);

            let mut draft = point.draft();
            for field in &fields[..count] {
                self.redraw(*field, &mut draft, rng);
            }
            if draft == point.draft() {
                continue;
            }

            if let Ok(candidate) = draft.validate() {
                return Some(candidate);
            }
        }
        None
    }

    /// Redraw one field within its declared domain, ignoring constraints
    fn redraw<R: Rng + ?Sized>(&self, field: Field, draft: &mut PointDraft, rng: &mut R) {
        let c = &self.config;
        match field {
            Field::QpType => draft.qp_type = pick(&c.qp_types, rng),
            Field::Opcode => draft.opcode = pick(&c.opcodes, rng),
            Field::Direction => draft.direction = pick(&c.directions, rng),
            Field::Initiator => draft.initiator = pick(&c.initiators, rng),
            Field::Mtu => draft.mtu = pick(&c.mtus, rng),
            Field::MessageSize => draft.message_size = pick(&c.message_sizes, rng),
            Field::NumQp => draft.num_qp = c.num_qp.draw(rng),
            Field::SendBatch => draft.send_batch = c.send_batch.draw(rng),
            Field::RecvBatch => draft.recv_batch = c.recv_batch.draw(rng),
            Field::BurstSize => draft.burst_size = c.burst_size.draw(rng),
            Field::NumSge => draft.num_sge = c.num_sge.draw(rng),
        }
    }

    /// Reset `fields_to_drop` to their baseline values
    ///
    /// Returns an error when the projected configuration is structurally
    /// invalid; such a point must never reach the collector.
    pub fn project(
        &self,
        point: &Point,
        fields_to_drop: &BTreeSet<Field>,
    ) -> Result<Point, InvalidPoint> {
        let mut draft = point.draft();
        for field in fields_to_drop {
            draft.reset(*field);
        }
        draft.validate()
    }
}

fn pick<T: Copy, R: Rng + ?Sized>(items: &[T], rng: &mut R) -> T {
    items[rng.random_range(0..items.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_space_is_valid() {
        assert!(ParameterSpace::new(SpaceConfig::default()).is_ok());
    }

    #[test]
    fn test_samples_are_valid_and_in_domain() {
        let space = ParameterSpace::new(SpaceConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..2000 {
            let point = space.sample(&mut rng);
            assert!(point.draft().validate().is_ok());
            assert!(space.contains(&point), "out of domain: {}", point);
        }
    }

    #[test]
    fn test_sample_is_deterministic_for_seed() {
        let space = ParameterSpace::new(SpaceConfig::default()).unwrap();
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);

        let first: Vec<Point> = (0..50).map(|_| space.sample(&mut a)).collect();
        let second: Vec<Point> = (0..50).map(|_| space.sample(&mut b)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_neighbor_changes_bounded_fields() {
        let space = ParameterSpace::new(SpaceConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let mut moves = 0;
        for _ in 0..500 {
            let point = space.sample(&mut rng);
            let Some(next) = space.try_neighbor(&point, 2, &mut rng) else {
                continue;
            };
            moves += 1;
            let changed = Field::ALL
                .iter()
                .filter(|f| !point.matches_on(&next, &[**f]))
                .count();
            assert!((1..=2).contains(&changed), "changed {} fields", changed);
            assert!(space.contains(&next));
        }
        assert!(moves > 400, "only {} neighbour moves", moves);
    }

    #[test]
    fn test_neighbor_falls_back_to_sample_when_stuck() {
        // Every domain holds only the baseline value, so no move exists
        let config = SpaceConfig {
            qp_types: vec![QpType::Rc],
            opcodes: vec![Opcode::Write],
            directions: vec![Direction::Unidirectional],
            initiators: vec![Initiator::First],
            mtus: vec![1024],
            message_sizes: vec![4096],
            num_qp: IntRange::new(1, 1),
            send_batch: IntRange::new(1, 1),
            recv_batch: IntRange::new(1, 1),
            burst_size: IntRange::new(1, 1),
            num_sge: IntRange::new(1, 1),
        };
        let space = ParameterSpace::new(config).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let point = Point::baseline();

        assert_eq!(space.try_neighbor(&point, 3, &mut rng), None);
        assert_eq!(space.neighbor(&point, 3, &mut rng), point);
    }

    #[test]
    fn test_ud_only_space_respects_mtu() {
        let config = SpaceConfig {
            qp_types: vec![QpType::Ud],
            mtus: vec![256, 4096],
            message_sizes: vec![128, 1024, 8192],
            ..Default::default()
        };
        let space = ParameterSpace::new(config).unwrap();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..500 {
            let point = space.sample(&mut rng);
            assert_eq!(point.opcode(), Opcode::Send);
            assert!(point.message_size() <= point.mtu());
            assert!(point.recv_batch() >= 1);
        }
    }

    #[test]
    fn test_empty_domain_rejected() {
        let config = SpaceConfig {
            opcodes: vec![],
            ..Default::default()
        };
        assert_eq!(
            ParameterSpace::new(config).unwrap_err(),
            ConfigurationError::EmptyDomain(Field::Opcode)
        );
    }

    #[test]
    fn test_unsatisfiable_transport_rejected() {
        // UD only carries SEND, which needs receive WQEs
        let config = SpaceConfig {
            qp_types: vec![QpType::Ud],
            recv_batch: IntRange::new(0, 0),
            ..Default::default()
        };
        assert_eq!(
            ParameterSpace::new(config).unwrap_err(),
            ConfigurationError::EmptyDomain(Field::QpType)
        );
    }

    #[test]
    fn test_invalid_range_rejected() {
        let config = SpaceConfig {
            num_qp: IntRange::new(0, 8),
            ..Default::default()
        };
        assert!(matches!(
            ParameterSpace::new(config),
            Err(ConfigurationError::InvalidRange {
                field: Field::NumQp,
                ..
            })
        ));
    }

    #[test]
    fn test_project_resets_to_baseline() {
        let space = ParameterSpace::new(SpaceConfig::default()).unwrap();
        let point = PointDraft {
            qp_type: QpType::Uc,
            num_qp: 64,
            burst_size: 32,
            ..Default::default()
        }
        .validate()
        .unwrap();

        let dropped: BTreeSet<Field> = [Field::NumQp].into_iter().collect();
        let projected = space.project(&point, &dropped).unwrap();

        assert_eq!(projected.num_qp(), 1);
        assert_eq!(projected.burst_size(), 32);
        assert_eq!(projected.non_default_fields(), vec![Field::QpType, Field::BurstSize]);
    }

    #[test]
    fn test_project_rejects_invalid_result() {
        let space = ParameterSpace::new(SpaceConfig::default()).unwrap();
        let point = PointDraft {
            qp_type: QpType::Ud,
            opcode: Opcode::Send,
            mtu: 4096,
            message_size: 2048,
            ..Default::default()
        }
        .validate()
        .unwrap();

        // Baseline opcode is WRITE, which UD cannot carry
        let drop_opcode: BTreeSet<Field> = [Field::Opcode].into_iter().collect();
        assert!(space.project(&point, &drop_opcode).is_err());

        // Baseline mtu 1024 is smaller than the 2048 byte UD message
        let drop_mtu: BTreeSet<Field> = [Field::Mtu].into_iter().collect();
        assert!(space.project(&point, &drop_mtu).is_err());
    }
}
