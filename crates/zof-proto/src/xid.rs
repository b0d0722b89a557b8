use std::collections::HashSet;

/// 32-bit OpenFlow transaction id correlating requests and replies.
pub type Xid = u32;

/// Advances `counter` to the next xid that is nonzero and not in `outstanding`.
///
/// Strictly monotonically increasing 32-bit counter, wrapping skipped
/// over zero and over any xid currently outstanding.
pub fn allocate_xid(counter: &mut Xid, outstanding: &HashSet<Xid>) -> Xid {
    loop {
        *counter = counter.wrapping_add(1);
        if *counter != 0 && !outstanding.contains(counter) {
            return *counter;
        }
    }
}
