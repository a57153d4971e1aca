//! Address pattern matching against realistic control-surface addresses

use osclink_core::Pattern;

fn check(pattern: &str, hits: &[&str], misses: &[&str]) {
    let compiled = Pattern::compile(pattern);
    for address in hits {
        assert!(compiled.matches(address), "{} should match {}", pattern, address);
    }
    for address in misses {
        assert!(!compiled.matches(address), "{} should not match {}", pattern, address);
    }
}

#[test]
fn test_mixer_channels() {
    check(
        "/mixer/ch[0-9][0-9]/fader",
        &["/mixer/ch01/fader", "/mixer/ch99/fader"],
        &["/mixer/ch1/fader", "/mixer/chAB/fader", "/mixer/ch01/fader/x"],
    );
}

#[test]
fn test_star_crosses_segments() {
    check(
        "/synth/*/gain",
        &["/synth/1/gain", "/synth/a/b/gain", "/synth//gain"],
        &["/synth/gain", "/synth/1/gain/"],
    );
}

#[test]
fn test_alternatives_with_wildcards_around() {
    check(
        "/fx/*/{reverb,delay}/mix",
        &["/fx/bus1/reverb/mix", "/fx/x/delay/mix"],
        &["/fx/bus1/rev/mix", "/fx/bus1/reverb*/mix", "/fx/bus1/chorus/mix"],
    );
}

#[test]
fn test_negated_class_of_separators() {
    check("/a/[!/]", &["/a/b", "/a/-"], &["/a//", "/a/", "/a/bc"]);
}

#[test]
fn test_regex_metacharacters_taken_literally() {
    check(
        "/cue/1.5/(go)+",
        &["/cue/1.5/(go)+"],
        &["/cue/1x5/(go)+", "/cue/1.5/gogo"],
    );
}

#[test]
fn test_class_with_backslash_and_caret() {
    check("/k/[\\^]", &["/k/\\", "/k/^"], &["/k/a"]);
}

#[test]
fn test_unicode_addresses() {
    check("/voix/?/é*", &["/voix/ü/été"], &["/voix/üü/été"]);
}

#[test]
fn test_literal_detection() {
    assert!(Pattern::compile("/plain/address").is_literal());
    assert!(!Pattern::compile("/a/{b,c}").is_literal());
    assert!(!Pattern::compile("/a/[bc]").is_literal());
}
