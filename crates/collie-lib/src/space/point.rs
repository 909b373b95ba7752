//! Traffic configuration points
//!
//! A [`Point`] is only ever built by validating a [`PointDraft`], so any
//! `Point` in hand satisfies every structural constraint the workload
//! relies on.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvalidPoint;

/// Largest scatter/gather list the workload accepts
pub const MAX_SGE: u32 = 16;

/// Path MTUs accepted by the NIC
pub const VALID_MTUS: [u32; 5] = [256, 512, 1024, 2048, 4096];

/// Queue pair transport type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QpType {
    #[serde(rename = "RC")]
    Rc,
    #[serde(rename = "UC")]
    Uc,
    #[serde(rename = "UD")]
    Ud,
}

impl QpType {
    pub const ALL: [QpType; 3] = [QpType::Rc, QpType::Uc, QpType::Ud];

    /// Whether this transport can carry the given opcode
    pub fn supports(&self, opcode: Opcode) -> bool {
        match self {
            QpType::Rc => true,
            QpType::Uc => opcode != Opcode::Read,
            QpType::Ud => opcode == Opcode::Send,
        }
    }
}

impl fmt::Display for QpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QpType::Rc => write!(f, "RC"),
            QpType::Uc => write!(f, "UC"),
            QpType::Ud => write!(f, "UD"),
        }
    }
}

/// RDMA verb used for the data path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Opcode {
    Send,
    Write,
    Read,
}

impl Opcode {
    pub const ALL: [Opcode; 3] = [Opcode::Send, Opcode::Write, Opcode::Read];

    /// Two-sided opcodes consume receive WQEs on the responder
    pub fn is_two_sided(&self) -> bool {
        matches!(self, Opcode::Send)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Send => write!(f, "SEND"),
            Opcode::Write => write!(f, "WRITE"),
            Opcode::Read => write!(f, "READ"),
        }
    }
}

/// Whether traffic flows one way or both ways between the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Unidirectional,
    Bidirectional,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Unidirectional, Direction::Bidirectional];
}

/// Which host of the pair initiates traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Initiator {
    First,
    Second,
}

impl Initiator {
    pub const ALL: [Initiator; 2] = [Initiator::First, Initiator::Second];

    /// Index of the initiating host within the pair
    pub fn host_index(&self) -> usize {
        match self {
            Initiator::First => 0,
            Initiator::Second => 1,
        }
    }
}

/// A named parameter of the search space, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    QpType,
    Opcode,
    Direction,
    Initiator,
    Mtu,
    MessageSize,
    NumQp,
    SendBatch,
    RecvBatch,
    BurstSize,
    NumSge,
}

impl Field {
    /// Every field in declaration order
    pub const ALL: [Field; 11] = [
        Field::QpType,
        Field::Opcode,
        Field::Direction,
        Field::Initiator,
        Field::Mtu,
        Field::MessageSize,
        Field::NumQp,
        Field::SendBatch,
        Field::RecvBatch,
        Field::BurstSize,
        Field::NumSge,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::QpType => "qp_type",
            Field::Opcode => "opcode",
            Field::Direction => "direction",
            Field::Initiator => "initiator",
            Field::Mtu => "mtu",
            Field::MessageSize => "message_size",
            Field::NumQp => "num_qp",
            Field::SendBatch => "send_batch",
            Field::RecvBatch => "recv_batch",
            Field::BurstSize => "burst_size",
            Field::NumSge => "num_sge",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unvalidated field values
///
/// `Default` yields the canonical baseline configuration that MFS
/// reduction resets fields to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointDraft {
    pub qp_type: QpType,
    pub opcode: Opcode,
    pub direction: Direction,
    pub initiator: Initiator,
    pub mtu: u32,
    pub message_size: u32,
    pub num_qp: u32,
    pub send_batch: u32,
    pub recv_batch: u32,
    pub burst_size: u32,
    pub num_sge: u32,
}

impl Default for PointDraft {
    fn default() -> Self {
        Self {
            qp_type: QpType::Rc,
            opcode: Opcode::Write,
            direction: Direction::Unidirectional,
            initiator: Initiator::First,
            mtu: 1024,
            message_size: 4096,
            num_qp: 1,
            send_batch: 1,
            recv_batch: 1,
            burst_size: 1,
            num_sge: 1,
        }
    }
}

impl PointDraft {
    /// Reset one field to its baseline value
    pub fn reset(&mut self, field: Field) {
        let baseline = PointDraft::default();
        self.copy_field(field, &baseline);
    }

    /// Copy one field's value from another draft
    pub fn copy_field(&mut self, field: Field, from: &PointDraft) {
        match field {
            Field::QpType => self.qp_type = from.qp_type,
            Field::Opcode => self.opcode = from.opcode,
            Field::Direction => self.direction = from.direction,
            Field::Initiator => self.initiator = from.initiator,
            Field::Mtu => self.mtu = from.mtu,
            Field::MessageSize => self.message_size = from.message_size,
            Field::NumQp => self.num_qp = from.num_qp,
            Field::SendBatch => self.send_batch = from.send_batch,
            Field::RecvBatch => self.recv_batch = from.recv_batch,
            Field::BurstSize => self.burst_size = from.burst_size,
            Field::NumSge => self.num_sge = from.num_sge,
        }
    }

    /// Whether one field holds the same value in both drafts
    pub fn field_eq(&self, field: Field, other: &PointDraft) -> bool {
        match field {
            Field::QpType => self.qp_type == other.qp_type,
            Field::Opcode => self.opcode == other.opcode,
            Field::Direction => self.direction == other.direction,
            Field::Initiator => self.initiator == other.initiator,
            Field::Mtu => self.mtu == other.mtu,
            Field::MessageSize => self.message_size == other.message_size,
            Field::NumQp => self.num_qp == other.num_qp,
            Field::SendBatch => self.send_batch == other.send_batch,
            Field::RecvBatch => self.recv_batch == other.recv_batch,
            Field::BurstSize => self.burst_size == other.burst_size,
            Field::NumSge => self.num_sge == other.num_sge,
        }
    }

    /// Check every structural constraint and produce a [`Point`]
    pub fn validate(self) -> Result<Point, InvalidPoint> {
        for (field, value) in [
            (Field::MessageSize, self.message_size),
            (Field::NumQp, self.num_qp),
            (Field::SendBatch, self.send_batch),
            (Field::BurstSize, self.burst_size),
            (Field::NumSge, self.num_sge),
        ] {
            if value == 0 {
                return Err(InvalidPoint::new(format!("{} must be at least 1", field)));
            }
        }

        if !VALID_MTUS.contains(&self.mtu) {
            return Err(InvalidPoint::new(format!("unsupported mtu {}", self.mtu)));
        }

        if !self.qp_type.supports(self.opcode) {
            return Err(InvalidPoint::new(format!(
                "{} queue pairs do not support {}",
                self.qp_type, self.opcode
            )));
        }

        if self.qp_type == QpType::Ud && self.message_size > self.mtu {
            return Err(InvalidPoint::new(format!(
                "UD message size {} exceeds mtu {}",
                self.message_size, self.mtu
            )));
        }

        if self.opcode.is_two_sided() && self.recv_batch == 0 {
            return Err(InvalidPoint::new("SEND requires a receive batch of at least 1"));
        }

        if self.num_sge > MAX_SGE {
            return Err(InvalidPoint::new(format!(
                "num_sge {} exceeds maximum {}",
                self.num_sge, MAX_SGE
            )));
        }

        if self.message_size < self.num_sge {
            return Err(InvalidPoint::new(format!(
                "message size {} cannot be split across {} SGEs",
                self.message_size, self.num_sge
            )));
        }

        Ok(Point { draft: self })
    }
}

/// A validated, immutable traffic configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PointDraft", into = "PointDraft")]
pub struct Point {
    draft: PointDraft,
}

impl TryFrom<PointDraft> for Point {
    type Error = InvalidPoint;

    fn try_from(draft: PointDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl From<Point> for PointDraft {
    fn from(point: Point) -> Self {
        point.draft
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::baseline()
    }
}

impl Point {
    /// The canonical baseline configuration
    pub fn baseline() -> Self {
        Self {
            draft: PointDraft::default(),
        }
    }

    /// Copy of the underlying field values, for building derived points
    pub fn draft(&self) -> PointDraft {
        self.draft
    }

    pub fn qp_type(&self) -> QpType {
        self.draft.qp_type
    }

    pub fn opcode(&self) -> Opcode {
        self.draft.opcode
    }

    pub fn direction(&self) -> Direction {
        self.draft.direction
    }

    pub fn initiator(&self) -> Initiator {
        self.draft.initiator
    }

    pub fn mtu(&self) -> u32 {
        self.draft.mtu
    }

    pub fn message_size(&self) -> u32 {
        self.draft.message_size
    }

    pub fn num_qp(&self) -> u32 {
        self.draft.num_qp
    }

    pub fn send_batch(&self) -> u32 {
        self.draft.send_batch
    }

    pub fn recv_batch(&self) -> u32 {
        self.draft.recv_batch
    }

    pub fn burst_size(&self) -> u32 {
        self.draft.burst_size
    }

    pub fn num_sge(&self) -> u32 {
        self.draft.num_sge
    }

    /// Fields whose value differs from the baseline, in declaration order
    pub fn non_default_fields(&self) -> Vec<Field> {
        let baseline = PointDraft::default();
        Field::ALL
            .into_iter()
            .filter(|f| !self.draft.field_eq(*f, &baseline))
            .collect()
    }

    /// Whether this point agrees with `other` on every listed field
    pub fn matches_on(&self, other: &Point, fields: &[Field]) -> bool {
        fields.iter().all(|f| self.draft.field_eq(*f, &other.draft))
    }

    /// Canonical JSON encoding
    pub fn to_json(&self) -> String {
        // Serializing plain enums and integers cannot fail
        serde_json::to_string(&self.draft).unwrap_or_default()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {:?} mtu={} msg={} qps={} sbatch={} rbatch={} burst={} sge={}",
            self.qp_type(),
            self.opcode(),
            self.direction(),
            self.mtu(),
            self.message_size(),
            self.num_qp(),
            self.send_batch(),
            self.recv_batch(),
            self.burst_size(),
            self.num_sge()
        )
    }
}
