use super::*;
use rand::distributions::{Alphanumeric, DistString};
use rand::{Rng, thread_rng};

#[test]
fn display_form_collapses_whitespace() {
    assert_eq!(
        display_form("  How do I\tmake \n Tom Yum   soup?  "),
        "How do I make Tom Yum soup?"
    );
    assert_eq!(display_form("   "), "");
}

#[test]
fn normalize_case_folds() {
    assert_eq!(
        normalize("How do I make TOM YUM soup?"),
        "how do i make tom yum soup?"
    );
    assert_eq!(normalize("ÉCLAIR Recipe"), "éclair recipe");
}

#[test]
fn normalize_is_idempotent() {
    let once = normalize("  What  Is Green   CURRY? ");
    assert_eq!(normalize(&once), once);
}

#[test]
fn id_ignores_case_and_spacing() {
    assert_eq!(
        question_id("How do I make Tom Yum soup?"),
        question_id("  how do i make tom yum   soup?")
    );
    assert_ne!(
        question_id("How do I make Tom Yum soup?"),
        question_id("How do I make Tom Kha soup?")
    );
}

#[test]
fn id_is_hex_sha256() {
    let id = question_id("what is pad thai?");
    assert_eq!(id.len(), 64);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn id_is_deterministic_for_random_inputs() {
    let mut rng = thread_rng();
    for _ in 0..100 {
        let len = rng.gen_range(1..80);
        let text = Alphanumeric.sample_string(&mut rng, len);

        let first = question_id(&text);
        let second = question_id(&text);
        assert_eq!(first, second, "id changed for {:?}", text);
        assert_eq!(first, question_id(&normalize(&text)));
    }
}
