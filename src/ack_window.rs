use tracing::trace;
use crate::bits::bit_vector::BitVector;
use crate::seq_no::SeqNo;

/// Tracks which of the most recent sequence numbers were received, relative to a high-water
///  mark (`ack`, the newest sequence number seen so far).
///
/// Bit `i` of the window means "`ack - i - 1` was received". Sequence numbers more than the
///  window width behind the high-water mark cannot be represented and are treated as unknown.
///
/// The `(ack, bits)` pair is what goes into every outgoing packet header; the partner uses
///  [AckWindow::acknowledges] to decide which of its pending messages arrived.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AckWindow {
    ack: SeqNo,
    bits: BitVector,
}

impl AckWindow {
    pub fn new(width: usize) -> AckWindow {
        Self::starting_at(width, SeqNo::ZERO)
    }

    /// Creates a window whose high-water mark is `ack`, with no older sequence numbers marked.
    ///
    /// NB: Starting one before the first expected sequence number means that no actual
    ///      sequence number is acknowledged before something was received
    pub fn starting_at(width: usize, ack: SeqNo) -> AckWindow {
        assert!(width > 0 && width < 32768, "ack window width must be in 1..32768, was {}", width);
        AckWindow {
            ack,
            bits: BitVector::new(width),
        }
    }

    pub fn width(&self) -> usize {
        self.bits.len()
    }

    pub fn ack(&self) -> SeqNo {
        self.ack
    }

    pub fn bits(&self) -> &BitVector {
        &self.bits
    }

    pub fn ack_receive(&mut self, seq: SeqNo) {
        let diff = seq.difference(self.ack);
        let width = self.width();

        if diff == 0 {
            return;
        }

        if diff > 0 {
            let diff = diff as usize;
            if diff > width {
                trace!("seq {} is {} ahead of high-water mark {} - clearing ack window", seq, diff, self.ack);
                self.bits.clear_all();
            }
            else {
                self.bits.shift_left(diff);
                // the previous high-water mark
                self.bits.set(diff - 1);
            }
            self.ack = seq;
        }
        else {
            let d = diff.unsigned_abs() as usize;
            if d <= width {
                self.bits.set(d - 1);
            }
            else {
                trace!("seq {} is too old to be represented relative to high-water mark {} - ignoring", seq, self.ack);
            }
        }
    }

    pub fn is_received(&self, seq: SeqNo) -> bool {
        Self::acknowledges(self.ack, &self.bits, seq)
    }

    /// evaluates a partner's `(ack, bits)` pair as received in a packet header
    pub fn acknowledges(ack: SeqNo, bits: &BitVector, seq: SeqNo) -> bool {
        let d = ack.difference(seq);
        if d == 0 {
            return true;
        }
        if d < 0 {
            return false;
        }
        let d = d as usize;
        d <= bits.len() && bits.get(d - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_golden_trace() {
        let input = [2, 3, 5, 6, 6, 6, 9, 13, 18, 16, 14, 10, 50];
        let expected = [
            (2, "0010"),
            (3, "0101"),
            (5, "0110"),
            (6, "1101"),
            (6, "1101"),
            (6, "1101"),
            (9, "1100"),
            (13, "1000"),
            (18, "0000"),
            (18, "0010"),
            (18, "1010"),
            (18, "1010"),
            (50, "0000"),
        ];

        let mut window = AckWindow::new(4);
        let actual = input.iter()
            .map(|&seq| {
                window.ack_receive(SeqNo::from_raw(seq));
                (window.ack().to_raw(), format!("{:?}", window.bits()))
            })
            .collect::<Vec<_>>();

        let expected = expected.iter()
            .map(|&(ack, bits)| (ack, bits.to_string()))
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case::high_water_mark(18, true)]
    #[case::marked(16, true)]
    #[case::marked_oldest(14, true)]
    #[case::not_marked(17, false)]
    #[case::too_old(10, false)]
    #[case::newer(19, false)]
    fn test_is_received(#[case] seq: u16, #[case] expected: bool) {
        let mut window = AckWindow::new(4);
        for seq in [18, 16, 14, 10] {
            window.ack_receive(SeqNo::from_raw(seq));
        }
        assert_eq!(window.is_received(SeqNo::from_raw(seq)), expected);
    }

    #[test]
    fn test_wraparound() {
        let mut window = AckWindow::starting_at(8, SeqNo::from_raw(65534));
        window.ack_receive(SeqNo::from_raw(65535));
        window.ack_receive(SeqNo::from_raw(1));

        assert_eq!(window.ack(), SeqNo::from_raw(1));
        assert!(window.is_received(SeqNo::from_raw(1)));
        assert!(!window.is_received(SeqNo::from_raw(0)));
        assert!(window.is_received(SeqNo::from_raw(65535)));
        assert!(window.is_received(SeqNo::from_raw(65534)));

        window.ack_receive(SeqNo::from_raw(0));
        assert!(window.is_received(SeqNo::from_raw(0)));
        assert_eq!(window.ack(), SeqNo::from_raw(1));
    }

    #[test]
    fn test_starting_before_first_seq() {
        let window = AckWindow::starting_at(32, SeqNo::ZERO.prev());
        for seq in 0..32 {
            assert!(!window.is_received(SeqNo::from_raw(seq)));
        }
    }
}
