use gk_glob::{IncludeExcludeGlobs, MatchDecision};

#[test]
fn forbidden_surface_globs_deny_matching_paths() {
    let rules = IncludeExcludeGlobs::new(
        &[],
        &["secrets/**".to_string(), "**/*.pem".to_string()],
    )
    .expect("compile rules");

    assert_eq!(
        rules.decide_str("secrets/prod.env"),
        MatchDecision::DeniedByExclude
    );
    assert_eq!(
        rules.decide_str("infra/tls/server.pem"),
        MatchDecision::DeniedByExclude
    );
    assert_eq!(rules.decide_str("src/lib.rs"), MatchDecision::Allowed);
}

#[test]
fn allowed_surface_include_globs_gate_unlisted_paths() {
    let rules =
        IncludeExcludeGlobs::new(&["src/**".to_string(), "tests/**".to_string()], &[])
            .expect("compile rules");

    assert_eq!(rules.decide_str("src/patch.rs"), MatchDecision::Allowed);
    assert_eq!(
        rules.decide_str("scripts/deploy.sh"),
        MatchDecision::DeniedByMissingInclude
    );
}
