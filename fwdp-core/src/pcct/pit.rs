use fwdp_common::{FaceId, Timestamp, PIT_MAX_DOWNSTREAMS};

/// One downstream face waiting on a pending record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PitDownstream {
    pub face: FaceId,
    pub nonce: u32,
    pub expiry: Timestamp,
}

/// Result of attaching a downstream to a slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PitAttach {
    /// The slot had no pending record; one was created
    Inserted,
    /// The downstream was added to, or refreshed on, an existing record
    Aggregated,
    /// Same face and nonce already recorded; the request is a loop or duplicate
    DuplicateAggregation,
}

/// Pending-request record.
///
/// Holds at most [`PIT_MAX_DOWNSTREAMS`] downstreams in a fixed array; the
/// record deadline is the latest downstream expiry.
#[derive(Clone, Debug, Default)]
pub struct PitRecord {
    dns: [PitDownstream; PIT_MAX_DOWNSTREAMS],
    n_dns: u8,
    deadline: Timestamp,
}

pub(crate) enum DnUpdate {
    Added,
    Refreshed,
    Duplicate,
    Full,
}

impl PitRecord {
    pub(crate) fn new(face: FaceId, nonce: u32, expiry: Timestamp) -> Self {
        let mut record = Self::default();
        record.dns[0] = PitDownstream { face, nonce, expiry };
        record.n_dns = 1;
        record.deadline = expiry;
        record
    }

    pub fn downstreams(&self) -> &[PitDownstream] {
        &self.dns[..self.n_dns as usize]
    }

    pub fn find_downstream(&self, face: FaceId) -> Option<&PitDownstream> {
        self.downstreams().iter().find(|dn| dn.face == face)
    }

    /// Latest expiry among the downstreams
    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    pub(crate) fn update(&mut self, face: FaceId, nonce: u32, expiry: Timestamp) -> DnUpdate {
        let n = self.n_dns as usize;
        let res = match self.dns[..n].iter().position(|dn| dn.face == face) {
            Some(i) if self.dns[i].nonce == nonce => return DnUpdate::Duplicate,
            Some(i) => {
                self.dns[i].nonce = nonce;
                self.dns[i].expiry = expiry;
                DnUpdate::Refreshed
            }
            None if n == PIT_MAX_DOWNSTREAMS => return DnUpdate::Full,
            None => {
                self.dns[n] = PitDownstream { face, nonce, expiry };
                self.n_dns += 1;
                DnUpdate::Added
            }
        };
        self.deadline = self.dns[..self.n_dns as usize]
            .iter()
            .map(|dn| dn.expiry)
            .max()
            .unwrap_or(expiry);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_outcomes() {
        let t = Timestamp::from_millis(100);
        let mut rec = PitRecord::new(FaceId(1), 0xA, t);
        assert_eq!(rec.downstreams().len(), 1);

        assert!(matches!(rec.update(FaceId(1), 0xA, t), DnUpdate::Duplicate));
        assert!(matches!(rec.update(FaceId(2), 0xB, t), DnUpdate::Added));
        assert!(matches!(
            rec.update(FaceId(1), 0xC, t.add_millis(50)),
            DnUpdate::Refreshed
        ));
        assert_eq!(rec.downstreams().len(), 2);
        assert_eq!(rec.find_downstream(FaceId(1)).unwrap().nonce, 0xC);
        assert_eq!(rec.deadline(), t.add_millis(50));
    }

    #[test]
    fn test_downstream_list_is_bounded() {
        let t = Timestamp::from_millis(1);
        let mut rec = PitRecord::new(FaceId(1), 0, t);
        for face in 2..=PIT_MAX_DOWNSTREAMS as u16 {
            assert!(matches!(rec.update(FaceId(face), 0, t), DnUpdate::Added));
        }
        assert!(matches!(rec.update(FaceId(100), 0, t), DnUpdate::Full));
        assert_eq!(rec.downstreams().len(), PIT_MAX_DOWNSTREAMS);
    }

    #[test]
    fn test_deadline_can_move_backwards_on_refresh() {
        let mut rec = PitRecord::new(FaceId(1), 1, Timestamp::from_millis(500));
        rec.update(FaceId(1), 2, Timestamp::from_millis(200));
        assert_eq!(rec.deadline(), Timestamp::from_millis(200));
    }
}
