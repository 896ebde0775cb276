//! # Library-Level Composition Scenarios
//!
//! Exercises `Orchestrator`, `CommandChain`, and the builtin command
//! registry together against the public API, the way the teacher's
//! `tests/integration_tests.rs` exercises `bootstrap_main` end-to-end
//! rather than through individual unit tests.

use mancer::chain::CommandChain;
use mancer::command::registry::{cat, echo, grep, ps, wc_lines};
use mancer::config::Config;
use mancer::context::ExecutionContext;
use mancer::orchestrator::Orchestrator;

fn orchestrator() -> Orchestrator {
    Orchestrator::new(&Config::default()).unwrap()
}

#[tokio::test]
async fn test_pipe_chain_feeds_stdout_into_next_stdin() {
    let orchestrator = orchestrator();
    let ctx = ExecutionContext::new();

    let chain = CommandChain::new(echo("one\ntwo\nthree").unwrap())
        .pipe(wc_lines().unwrap());

    let result = orchestrator.execute_chain(&chain, &ctx).await.unwrap();
    assert!(result.success);
    assert_eq!(result.stdout.trim(), "3");
}

#[tokio::test]
async fn test_grep_builtin_treats_no_match_as_success() {
    let orchestrator = orchestrator();
    let ctx = ExecutionContext::new();

    let chain = CommandChain::new(echo("alpha\nbeta").unwrap())
        .pipe(grep("zzz_not_present", false).unwrap());

    let result = orchestrator.execute_chain(&chain, &ctx).await.unwrap();
    assert!(result.success);
    assert_eq!(result.stdout, "");
}

#[tokio::test]
async fn test_then_link_does_not_plumb_stdin() {
    let orchestrator = orchestrator();
    let ctx = ExecutionContext::new();

    let chain = CommandChain::new(echo("first").unwrap()).then(echo("second").unwrap());

    let result = orchestrator.execute_chain(&chain, &ctx).await.unwrap();
    assert!(result.success);
    assert_eq!(result.stdout.trim(), "second");
}

#[tokio::test]
async fn test_cache_is_shared_across_repeated_chain_execution() {
    let orchestrator = orchestrator();
    let ctx = ExecutionContext::new();
    let chain = CommandChain::new(cat(vec!["/etc/hostname".to_string()]).unwrap());

    let first = orchestrator.execute_chain(&chain, &ctx).await.unwrap();
    let second = orchestrator.execute_chain(&chain, &ctx).await.unwrap();

    assert_eq!(first.stdout, second.stdout);
    assert!(second.history.last().unwrap().cached);
}

#[tokio::test]
async fn test_history_records_every_chain_link() {
    let orchestrator = orchestrator();
    let ctx = ExecutionContext::new();
    let chain = CommandChain::new(echo("a").unwrap()).pipe(wc_lines().unwrap());

    let result = orchestrator.execute_chain(&chain, &ctx).await.unwrap();

    assert_eq!(result.history.len(), 2);
    assert!(result.history.steps()[0].command_name.starts_with("echo"));
    assert!(result.history.steps()[1].command_name.starts_with("wc"));

    let history = orchestrator.get_history().await;
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_pipe_chain_rendered_string_and_history_length_arithmetic() {
    let orchestrator = orchestrator();
    let ctx = ExecutionContext::new();

    let a = ps().unwrap();
    let b = grep("bash", false).unwrap();
    let a_history_len = orchestrator
        .execute_command(&a, &ctx)
        .await
        .unwrap()
        .history
        .len();
    let b_history_len = orchestrator
        .execute_command(&b, &ctx)
        .await
        .unwrap()
        .history
        .len();

    let chain = CommandChain::new(ps().unwrap()).pipe(grep("bash", false).unwrap());
    assert_eq!(chain.rendered_string(), "ps aux | grep bash");

    let result = orchestrator.execute_chain(&chain, &ctx).await.unwrap();
    assert_eq!(result.history.len(), a_history_len + b_history_len);
}
