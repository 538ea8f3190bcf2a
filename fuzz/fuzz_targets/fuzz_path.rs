// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fuzz target for path phrase parsing

#![no_main]

use doppel_core::{AbstractPath, AfsPath};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(path) = AbstractPath::parse_phrase(input) {
        let phrase = path.to_phrase();
        let again = AbstractPath::parse_phrase(&phrase).expect("phrase of a parsed path must parse");
        assert_eq!(path, again, "{input:?} -> {phrase:?}");

        let _ = path.parent();
        let _ = path.name();
        let joined = path.join(input);
        let _ = joined.to_phrase();
    }

    let afs = AfsPath::new(input);
    let _ = afs.extension();
    if let Some(parent) = afs.parent() {
        assert!(afs.strip_prefix(&parent).is_some());
    }
});
