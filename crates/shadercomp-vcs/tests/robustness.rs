use std::io::Cursor;

use proptest::prelude::*;
use shadercomp_vcs::{read_archive, unpack_region};

proptest! {
    // Guards against panics on corrupted/truncated inputs; not a replacement
    // for coverage-guided fuzzing.
    #[test]
    fn reader_never_panics(data in proptest::collection::vec(any::<u8>(), 0..8192)) {
        let _ = read_archive(&mut Cursor::new(data.as_slice()));
    }

    #[test]
    fn region_decoder_never_panics(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let _ = unpack_region(&data);
    }
}
