use std::collections::BTreeMap;
use storypilot::config::{Config, WorkflowConfig};
use storypilot::state::{Route, RouteTarget, Router, StoryStatus};

#[test]
fn test_default_config_covers_default_routes() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert!(config.validate_router(&Router::default()).is_ok());
    assert_eq!(
        config.full_cycle_steps,
        vec!["create-story", "dev-story", "code-review", "git-commit"]
    );
}

#[test]
fn test_config_validation_rejects_empty_binary() {
    let config = Config {
        claude_binary: "  ".to_string(),
        ..Config::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_rejects_empty_cycle() {
    let config = Config {
        full_cycle_steps: Vec::new(),
        ..Config::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_custom_router_and_workflow_work_together() {
    let mut config = Config::default();
    config.workflows.insert(
        "triage".to_string(),
        WorkflowConfig::new("/triage {story_key} --quick"),
    );
    let router = Router::new(BTreeMap::from([
        (
            StoryStatus::from("new"),
            RouteTarget::Workflow("triage".to_string()),
        ),
        (StoryStatus::from("closed"), RouteTarget::Complete),
    ]));

    assert!(config.validate().is_ok());
    assert!(config.validate_router(&router).is_ok());

    let Route::Continue(workflow) = router.route(&StoryStatus::from("new")) else {
        panic!("expected a workflow route");
    };
    let request = config.request_for(&workflow, "4-2").unwrap();
    assert_eq!(request.prompt, "/triage 4-2 --quick");
    assert_eq!(router.route(&StoryStatus::from("closed")), Route::Complete);
    assert_eq!(router.route(&StoryStatus::from("backlog")), Route::Unroutable);
}
