//! End-to-end pipeline tests.
//!
//! These drive materialized pipelines through every branch and check the
//! observable guarantees:
//!
//! 1. Middleware order and container contents
//! 2. Branch dispatch and escalation
//! 3. Chain control (`Flow`, `works`, `works_for_err`)
//! 4. Teardown order (end FIFO, destroy LIFO) on every branch
//! 5. Isolation between concurrent invocations
//! 6. Default JSON envelopes

use futures_util::future::join_all;
use lamina_core::{Failure, Fault, Options, Service, TypedError};
use lamina_pipeline::middleware::service;
use lamina_pipeline::{
    returns_when, routed, works, works_for_err, Creator, CreationLifecycle, FnCreator, FnMiddleware, Flow,
    LifecycleError, Package, Pipeline, RequestLifecycle,
};
use lamina_test::{Recorder, TestInvoker};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct A(u32);
struct B(u32);

/// A middleware that records its run and registers both hooks.
fn recorded(name: &'static str, recorder: &Recorder) -> impl Creator {
    let recorder = recorder.clone();
    service(name, move |_request, lifecycle: RequestLifecycle| {
        let recorder = recorder.clone();
        async move {
            recorder.record(format!("mw:{name}"));
            let end = recorder.clone();
            lifecycle.on_end(move || async move {
                end.record(format!("end:{name}"));
                Ok(())
            })?;
            let destroy = recorder.clone();
            lifecycle.on_destroy(move || async move {
                destroy.record(format!("destroy:{name}"));
                Ok(())
            })?;
            Ok(Service::new())
        }
    })
}

fn a_then_b(recorder: &Recorder) -> Pipeline {
    let a = recorder.clone();
    let b = recorder.clone();
    Pipeline::new()
        .srv(service("A", move |_request, lifecycle: RequestLifecycle| {
            let recorder = a.clone();
            async move {
                recorder.record("mw:A");
                let end = recorder.clone();
                lifecycle.on_end(move || async move {
                    end.record("end:A");
                    Ok(())
                })?;
                let destroy = recorder.clone();
                lifecycle.on_destroy(move || async move {
                    destroy.record("destroy:A");
                    Ok(())
                })?;
                Ok(Service::new().with(A(1)))
            }
        }))
        .srv(service("B", move |request, lifecycle: RequestLifecycle| {
            let recorder = b.clone();
            async move {
                // B builds on A
                let a = request.require::<A>()?;
                recorder.record("mw:B");
                let end = recorder.clone();
                lifecycle.on_end(move || async move {
                    end.record("end:B");
                    Ok(())
                })?;
                let destroy = recorder.clone();
                lifecycle.on_destroy(move || async move {
                    destroy.record("destroy:B");
                    Ok(())
                })?;
                Ok(Service::new().with(B(a.0 + 1)))
            }
        }))
}

// ============================================================================
// Success branch
// ============================================================================

#[tokio::test]
async fn test_two_middleware_feed_the_success_handler() {
    let recorder = Recorder::new();
    let handler_recorder = recorder.clone();
    let transform_recorder = recorder.clone();

    let handler = a_then_b(&recorder)
        .ok(move |request, _| {
            let recorder = handler_recorder.clone();
            async move {
                recorder.record("ok");
                let a = request.require::<A>()?;
                let b = request.require::<B>()?;
                Ok(Flow::next(format!("{} & {}", a.0, b.0)))
            }
        })
        .on_ok_res(move |_result, _request, response| {
            let recorder = transform_recorder.clone();
            async move {
                recorder.record("transform");
                Ok(response)
            }
        })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(200)
        .assert_data(&json!("1 & 2"));

    recorder.assert_entries(&[
        "mw:A",
        "mw:B",
        "ok",
        "transform",
        "end:A",
        "end:B",
        "destroy:B",
        "destroy:A",
    ]);
}

#[tokio::test]
async fn test_empty_container_without_middleware() {
    let handler = Pipeline::new()
        .ok(|request, _| async move { Ok(Flow::next(request.service().len())) })
        .req();

    TestInvoker::new(&handler).send().await.assert_data(&json!(0));
}

#[tokio::test]
async fn test_earlier_middleware_wins_capability_conflicts() {
    let handler = Pipeline::new()
        .srv(service("first", |_, _| async { Ok(Service::new().with(A(1))) }))
        .srv(service("second", |_, _| async { Ok(Service::new().with(A(2)).with(B(3))) }))
        .ok(|request, _| async move {
            Ok(Flow::next(json!([request.require::<A>()?.0, request.require::<B>()?.0])))
        })
        .req();

    TestInvoker::new(&handler).send().await.assert_data(&json!([1, 3]));
}

#[tokio::test]
async fn test_returns_true_stops_the_chain() {
    let recorder = Recorder::new();
    let second = recorder.clone();

    let handler = Pipeline::new()
        .ok(|_, _| async { Ok(Flow::returns(true, "first")) })
        .ok(move |_, _| {
            let recorder = second.clone();
            async move {
                recorder.record("second");
                Ok(Flow::next("second"))
            }
        })
        .req();

    TestInvoker::new(&handler).send().await.assert_data(&json!("first"));
    assert!(recorder.is_empty());
}

#[tokio::test]
async fn test_returns_false_continues() {
    let handler = Pipeline::new()
        .ok(|_, _| async { Ok(Flow::returns(false, "first")) })
        .ok(|_, _| async { Ok(Flow::next("second")) })
        .req();

    TestInvoker::new(&handler).send().await.assert_data(&json!("second"));
}

#[tokio::test]
async fn test_returns_when_resolves_async_condition() {
    let handler = Pipeline::new()
        .ok(|request, _| async move {
            let cached = request.event()["cached"].as_bool().unwrap_or(false);
            returns_when(move || async move { cached }, "from cache").await
        })
        .ok(|_, _| async { Ok(Flow::next("computed")) })
        .req();

    TestInvoker::new(&handler)
        .field("cached", true)
        .send()
        .await
        .assert_data(&json!("from cache"));
    TestInvoker::new(&handler)
        .field("cached", false)
        .send()
        .await
        .assert_data(&json!("computed"));
}

#[tokio::test]
async fn test_works_false_has_no_side_effect() {
    let recorder = Recorder::new();
    let gated = recorder.clone();

    let handler = Pipeline::new()
        .ok(|_, _| async { Ok(Flow::next("kept")) })
        .ok(move |_, _| {
            let recorder = gated.clone();
            works(false, move || async move {
                recorder.record("gated");
                Ok(Flow::next("replaced"))
            })
        })
        .req();

    TestInvoker::new(&handler).send().await.assert_data(&json!("kept"));
    assert!(recorder.is_empty());
}

#[tokio::test]
async fn test_skipped_error_leaves_result_untouched() {
    let handler = Pipeline::new()
        .ok(|_, _| async { Ok(Flow::next("kept")) })
        .ok(|_, _| async { Err(TypedError::skipped().into()) })
        .ok(|_, _| async { Ok(Flow::Skip) })
        .req();

    TestInvoker::new(&handler).send().await.assert_data(&json!("kept"));
}

#[tokio::test]
async fn test_unmatched_router_contributes_nothing() {
    let handler = Pipeline::new()
        .ok(|_, _| async { Ok(Flow::next("default")) })
        .ok(|request, _| async move {
            let id = routed(request.event()["user_id"].as_u64())?;
            Ok(Flow::next(format!("user {id}")))
        })
        .req();

    TestInvoker::new(&handler).send().await.assert_data(&json!("default"));
    TestInvoker::new(&handler)
        .field("user_id", 7)
        .send()
        .await
        .assert_data(&json!("user 7"));
}

#[tokio::test]
async fn test_skipping_middleware_contributes_nothing() {
    let handler = Pipeline::new()
        .srv(service("router", |request, _| async move {
            let path = routed(request.event()["path"].as_str())?;
            Ok(Service::new().with(path.to_string()))
        }))
        .srv(service("clock", |_, _| async { Ok(Service::new().with(A(9))) }))
        .ok(|request, _| async move {
            Ok(Flow::next(json!({
                "path": request.get::<String>().map(|p| p.as_str().to_string()),
                "clock": request.require::<A>()?.0,
            })))
        })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(200)
        .assert_body_excludes("Skipped")
        .assert_data(&json!({"path": null, "clock": 9}));
    TestInvoker::new(&handler)
        .field("path", "/users")
        .send()
        .await
        .assert_data(&json!({"path": "/users", "clock": 9}));
}

#[tokio::test]
async fn test_skipping_creator_is_left_out() {
    let handler = Pipeline::new()
        .srv(FnCreator::new("optional", |options: &Options, _: &CreationLifecycle| {
            if options.flag("optional_enabled") {
                Ok(FnMiddleware::new(|_, _| async { Ok(Service::new().with(A(1))) }))
            } else {
                Err(TypedError::skipped().into())
            }
        }))
        .ok(|request, _| async move { Ok(Flow::next(request.service().len())) })
        .req();

    assert!(!handler.is_disabled());
    TestInvoker::new(&handler).send().await.assert_data(&json!(0));
}

// ============================================================================
// Failure branch
// ============================================================================

#[tokio::test]
async fn test_middleware_declared_error_uses_default_envelope() {
    let handler = Pipeline::new()
        .srv(service("auth", |_, _| async {
            Err(TypedError::new("Unauthorized")
                .with_message("missing token")
                .with_code(401)
                .into())
        }))
        .ok(|_, _| async { Ok(Flow::next("unreachable")) })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(401)
        .assert_body_eq(
            r#"{"status":"error","error":{"type":"Unauthorized","message":"missing token","code":401}}"#,
        );
}

#[tokio::test]
async fn test_failure_handler_sees_container_before_failing_stage() {
    let handler = Pipeline::new()
        .srv(service("a", |_, _| async { Ok(Service::new().with(A(1))) }))
        .srv(service("b", |_, _| async { Err(TypedError::new("Broken").into()) }))
        .fail(|request, _| async move {
            Ok(Flow::next(json!({
                "a": request.get::<A>().map(|a| a.0),
                "b": request.get::<B>().map(|b| b.0),
                "type": request.error().kind(),
                "origin": request.error().origin(),
            })))
        })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(200)
        .assert_data(&json!({"a": 1, "b": null, "type": "Broken", "origin": 1}));
}

#[tokio::test]
async fn test_success_handler_declared_error_enters_failure_chain() {
    let handler = Pipeline::new()
        .ok(|_, _| async { Err(TypedError::new("NotFound").with_code(404).into()) })
        .fail(|request, _| async move {
            works_for_err(&request, &["NotFound"], |error| async move {
                Ok(Flow::next(format!("handled {}", error.kind())))
            })
            .await
        })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(200)
        .assert_data(&json!("handled NotFound"));
}

#[tokio::test]
async fn test_works_for_err_ignores_other_types() {
    let handler = Pipeline::new()
        .ok(|_, _| async { Err(TypedError::new("Conflict").with_code(409).into()) })
        .fail(|request, _| async move {
            works_for_err(&request, &["NotFound", "Gone"], |_| async {
                Ok(Flow::next("handled"))
            })
            .await
        })
        .req();

    // Nothing handled: the error itself is the result.
    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(409)
        .assert_error_type("Conflict");
}

#[tokio::test]
async fn test_failure_handler_can_replace_the_error() {
    let handler = Pipeline::new()
        .srv(service("db", |_, _| async { Err(TypedError::new("Timeout").into()) }))
        .fail(|_, _| async {
            Err(TypedError::new("Unavailable")
                .with_message("try again")
                .with_code(503)
                .into())
        })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(503)
        .assert_error_type("Unavailable")
        .assert_json_field("error.message", &json!("try again"));
}

#[tokio::test]
async fn test_packages_scope_failure_handlers() {
    let recorder = Recorder::new();
    let auth_fail = recorder.clone();
    let db_fail = recorder.clone();
    let global_fail = recorder.clone();

    let auth = Package::new(service("auth", |_, _| async { Ok(Service::new().with(A(1))) }))
        .fail(move |_, _| {
            let recorder = auth_fail.clone();
            async move {
                recorder.record("fail:auth");
                Ok(Flow::Skip)
            }
        });
    let db = Package::new(service("db", |_, _| async { Err(TypedError::new("DbDown").into()) }))
        .fail(move |request, _| {
            let recorder = db_fail.clone();
            async move {
                recorder.record(format!("fail:db:{}", request.error().kind()));
                Ok(Flow::next("degraded"))
            }
        });

    let handler = Pipeline::new()
        .pack(auth)
        .pack(db)
        .fail(move |_, _| {
            let recorder = global_fail.clone();
            async move {
                recorder.record("fail:global");
                Ok(Flow::Skip)
            }
        })
        .req();

    TestInvoker::new(&handler).send().await.assert_data(&json!("degraded"));
    recorder.assert_entries(&["fail:db:DbDown", "fail:global"]);
}

#[tokio::test]
async fn test_package_success_handler_runs_unscoped() {
    let package = Package::new(service("clock", |_, _| async { Ok(Service::new().with(A(7))) }))
        .ok(|request, _| async move { Ok(Flow::next(request.require::<A>()?.0)) });

    let handler = Pipeline::new().pack(package).req();
    TestInvoker::new(&handler).send().await.assert_data(&json!(7));
}

#[tokio::test]
async fn test_failure_transform_override_extends_default() {
    let handler = Pipeline::new()
        .ok(|_, _| async { Err(TypedError::new("Invalid").into()) })
        .on_fail_res(|result, _request, response| async move {
            let kind = result.err().map(|e| e.kind().to_string()).unwrap_or_default();
            Ok(response.with_header("x-error-type", kind))
        })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(400)
        .assert_header("x-error-type", "Invalid")
        .assert_error_type("Invalid");
}

// ============================================================================
// Fault branch
// ============================================================================

#[tokio::test]
async fn test_panic_message_reaches_fault_handler_verbatim() {
    let handler = Pipeline::new()
        .ok(|_, _| async { panic!("connection reset by peer (os error 104)") })
        .fatal(|request, _| async move {
            Ok(Flow::next(json!({
                "cause": request.exception().cause,
                "message": request.exception().message,
            })))
        })
        .req();

    TestInvoker::new(&handler).send().await.assert_data(&json!({
        "cause": Fault::PANIC,
        "message": "connection reset by peer (os error 104)",
    }));
}

#[tokio::test]
async fn test_fault_details_hidden_by_default() {
    let handler = Pipeline::new()
        .srv(service("db", |_, _| async {
            Err(Failure::Fault(Fault::new("Io", "password=hunter2")))
        }))
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(500)
        .assert_error_type(TypedError::FAULT)
        .assert_body_excludes("hunter2");
}

#[tokio::test]
async fn test_fault_details_exposed_by_option() {
    let handler = Pipeline::new()
        .opt(Options::new().with("expose_fault_details", true))
        .srv(service("db", |_, _| async {
            Err(Failure::Fault(Fault::new("Io", "disk full")))
        }))
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(500)
        .assert_json_field("error.cause", &json!("Io"))
        .assert_json_field("error.message", &json!("disk full"));
}

#[tokio::test]
async fn test_raise_in_failure_handler_enters_fault_chain() {
    let handler = Pipeline::new()
        .ok(|_, _| async { Err(TypedError::new("NotFound").into()) })
        .fail(|_, lifecycle| async move {
            lifecycle.raise(TypedError::new("Escalated").with_message("giving up"))
        })
        .fatal(|request, _| async move {
            Ok(Flow::next(format!(
                "{}: {}",
                request.exception().cause,
                request.exception().message
            )))
        })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_data(&json!("Escalated: giving up"));
}

#[tokio::test]
async fn test_raised_error_handled_by_later_failure_handler() {
    let handler = Pipeline::new()
        .srv(service("lookup", |_, _| async { Err(TypedError::new("Original").into()) }))
        .fail(|_, lifecycle| async move { lifecycle.raise(TypedError::new("Mapped")) })
        .fail(|request, _| async move {
            works_for_err(&request, &["Mapped"], |_| async { Ok(Flow::stop("handled")) }).await
        })
        .fatal(|_, _| async { Ok(Flow::next("fault branch")) })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(200)
        .assert_data(&json!("handled"));
}

#[tokio::test]
async fn test_returned_error_narrows_later_failure_handlers() {
    let handler = Pipeline::new()
        .ok(|_, _| async { Err(TypedError::new("Timeout").into()) })
        .fail(|request, _| async move {
            works_for_err(&request, &["Timeout"], |_| async {
                Err(TypedError::new("Unavailable").with_code(503).into())
            })
            .await
        })
        .fail(|request, _| async move {
            works_for_err(&request, &["Unavailable"], |error| async move {
                Ok(Flow::next(format!("retry later ({})", error.kind())))
            })
            .await
        })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_data(&json!("retry later (Unavailable)"));
}

#[tokio::test]
async fn test_unhandled_raise_still_reaches_fault_chain() {
    let handler = Pipeline::new()
        .srv(service("lookup", |_, _| async { Err(TypedError::new("Original").into()) }))
        .fail(|_, lifecycle| async move { lifecycle.raise(TypedError::new("Mapped")) })
        .fail(|request, _| async move {
            works_for_err(&request, &["Original"], |_| async { Ok(Flow::stop("stale")) }).await
        })
        .fatal(|request, _| async move { Ok(Flow::next(request.exception().cause.as_str())) })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_data(&json!("Mapped"));
}

#[tokio::test]
async fn test_fault_handler_declared_error_is_rendered() {
    let handler = Pipeline::new()
        .ok(|_, _| async { Err(Failure::Fault(Fault::unknown("boom"))) })
        .fatal(|_, _| async {
            Err(TypedError::new("Maintenance").with_code(503).into())
        })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(503)
        .assert_error_type("Maintenance");
}

#[tokio::test]
async fn test_double_fault_uses_fallback() {
    let handler = Pipeline::new()
        .ok(|_, _| async { panic!("first") })
        .fatal(|_, _| async { panic!("second") })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_status_code(500)
        .assert_body_eq(r#"{"status":"error","error":{"type":"Fault","message":"An internal error occurred"}}"#);
}

#[tokio::test]
async fn test_fatal_transform_error_uses_fallback() {
    let handler = Pipeline::new()
        .srv(service("db", |_, _| async { Err(Failure::Fault(Fault::unknown("down"))) }))
        .on_fatal(|_, _| async { Err(Failure::Fault(Fault::unknown("encoder broken"))) })
        .req();

    TestInvoker::new(&handler).send().await.assert_status_code(500);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_hooks_run_on_failure_branch() {
    let recorder = Recorder::new();
    let handler = Pipeline::new()
        .srv(recorded("a", &recorder))
        .srv(recorded("b", &recorder))
        .srv(service("c", |_, _| async { Err(TypedError::new("Stop").into()) }))
        .req();

    TestInvoker::new(&handler).send().await.assert_status_code(400);
    recorder.assert_entries(&["mw:a", "mw:b", "end:a", "end:b", "destroy:b", "destroy:a"]);
}

#[tokio::test]
async fn test_hooks_run_on_fault_branch() {
    let recorder = Recorder::new();
    let handler = Pipeline::new()
        .srv(recorded("a", &recorder))
        .srv(recorded("b", &recorder))
        .ok(|_, _| async { panic!("handler bug") })
        .req();

    TestInvoker::new(&handler).send().await.assert_status_code(500);
    recorder.assert_order(&["end:a", "end:b", "destroy:b", "destroy:a"]);
}

#[tokio::test]
async fn test_handler_end_hook_runs_after_middleware_end_hooks() {
    let recorder = Recorder::new();
    let handler_end = recorder.clone();

    let handler = Pipeline::new()
        .srv(recorded("a", &recorder))
        .ok(move |_, lifecycle| {
            let recorder = handler_end.clone();
            async move {
                let end = recorder.clone();
                lifecycle.on_end(move || async move {
                    end.record("end:ok");
                    Ok(())
                })?;
                // Second registration from the same handler is refused.
                let again = lifecycle.on_end(|| async { Ok(()) });
                assert!(matches!(again, Err(LifecycleError::AlreadyRegistered { .. })));
                Ok(Flow::next("done"))
            }
        })
        .req();

    TestInvoker::new(&handler).send().await.assert_data(&json!("done"));
    recorder.assert_entries(&["mw:a", "end:a", "end:ok", "destroy:a"]);
}

#[tokio::test]
async fn test_teardown_fault_reruns_fault_branch() {
    let recorder = Recorder::new();
    let fatal = recorder.clone();

    let handler = Pipeline::new()
        .srv(recorded("a", &recorder))
        .srv(service("pool", |_, lifecycle: RequestLifecycle| async move {
            lifecycle.on_destroy(|| async {
                Err(Failure::Fault(Fault::new("PoolError", "close failed")))
            })?;
            Ok(Service::new())
        }))
        .ok(|_, _| async { Ok(Flow::next("fine")) })
        .fatal(move |request, lifecycle| {
            let recorder = fatal.clone();
            async move {
                recorder.record(format!("fatal:{}", request.exception().cause));
                // Teardown is over; nothing more can be registered.
                let late = lifecycle.on_end(|| async { Ok(()) });
                assert_eq!(late, Err(LifecycleError::Closed));
                Ok(Flow::next("teardown failed"))
            }
        })
        .req();

    TestInvoker::new(&handler)
        .send()
        .await
        .assert_data(&json!("teardown failed"));
    // The other hooks still ran before the fault branch.
    recorder.assert_entries(&["mw:a", "end:a", "destroy:a", "fatal:PoolError"]);
}

#[tokio::test]
async fn test_middleware_hooks_refused_after_teardown() {
    let stash: Arc<Mutex<Option<RequestLifecycle>>> = Arc::default();
    let kept = Arc::clone(&stash);

    let handler = Pipeline::new()
        .srv(service("leaky", move |_, lifecycle: RequestLifecycle| {
            let kept = Arc::clone(&kept);
            async move {
                *kept.lock() = Some(lifecycle);
                Ok(Service::new())
            }
        }))
        .req();

    TestInvoker::new(&handler).send().await.assert_success();
    let lifecycle = stash.lock().take().unwrap();
    assert_eq!(
        lifecycle.on_destroy(|| async { Ok(()) }),
        Err(LifecycleError::Closed)
    );
}

// ============================================================================
// Creation and concurrency
// ============================================================================

#[tokio::test]
async fn test_creators_run_once_under_concurrency() {
    let created = Arc::new(AtomicUsize::new(0));
    let handled = Arc::new(AtomicUsize::new(0));
    let created_counter = Arc::clone(&created);
    let handled_counter = Arc::clone(&handled);

    let creator = FnCreator::new("counted", move |options: &Options, _: &CreationLifecycle| {
        created_counter.fetch_add(1, Ordering::SeqCst);
        let table = options.get::<String>("table").unwrap_or_default();
        let handled = Arc::clone(&handled_counter);
        Ok(FnMiddleware::new(move |_, _| {
            handled.fetch_add(1, Ordering::SeqCst);
            let table = table.clone();
            async move { Ok(Service::new().with(table)) }
        }))
    });

    let handler = Pipeline::new()
        .srv(creator)
        .opt(Options::new().with("table", "orders"))
        .ok(|request, _| async move { Ok(Flow::next(request.require::<String>()?.as_str())) })
        .req();

    let responses = join_all((0..16).map(|_| TestInvoker::new(&handler).send())).await;
    for response in &responses {
        response.assert_data(&json!("orders"));
    }
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(handled.load(Ordering::SeqCst), 16);
}

#[tokio::test]
async fn test_concurrent_invocations_keep_their_own_state() {
    let recorder = Recorder::new();
    let stage = recorder.clone();

    let handler = Pipeline::new()
        .srv(service("session", move |request, lifecycle: RequestLifecycle| {
            let recorder = stage.clone();
            async move {
                let name = request.event()["name"].as_str().unwrap_or("?").to_string();
                let delay = request.event()["delay"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let label = format!("destroy:{name}");
                lifecycle.on_destroy(move || async move {
                    recorder.record(label);
                    Ok(())
                })?;
                Ok(Service::new().with(name))
            }
        }))
        .ok(|request, _| async move { Ok(Flow::next(request.require::<String>()?.as_str())) })
        .req();

    let slow = tokio::spawn({
        let handler = handler.clone();
        async move {
            TestInvoker::new(&handler)
                .event(json!({"name": "slow", "delay": 60}))
                .send()
                .await
        }
    });
    let fast = tokio::spawn({
        let handler = handler.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            TestInvoker::new(&handler)
                .event(json!({"name": "fast", "delay": 0}))
                .send()
                .await
        }
    });

    fast.await.unwrap().assert_data(&json!("fast"));
    slow.await.unwrap().assert_data(&json!("slow"));
    recorder.assert_entries(&["destroy:fast", "destroy:slow"]);
}

#[tokio::test]
async fn test_raised_creation_error_routes_every_invocation() {
    let handler = Pipeline::new()
        .srv(FnCreator::new("config", |options: &Options, lifecycle: &CreationLifecycle| {
            if !options.contains("region") {
                lifecycle.raise(TypedError::new("MissingRegion").with_code(500));
            }
            Ok(FnMiddleware::new(|_, _| async { Ok(Service::new()) }))
        }))
        .fail(|request, _| async move {
            Ok(Flow::next(json!({
                "type": request.error().kind(),
                "origin": request.error().origin(),
            })))
        })
        .req();

    assert!(handler.is_disabled());
    for _ in 0..2 {
        TestInvoker::new(&handler)
            .send()
            .await
            .assert_data(&json!({"type": "MissingRegion", "origin": 0}));
    }
}

#[tokio::test]
async fn test_context_reaches_handlers() {
    let handler = Pipeline::new()
        .ok(|request, lifecycle| async move {
            assert_eq!(lifecycle.request_id(), request.request_id());
            Ok(Flow::next(request.context().function_name().map(str::to_string)))
        })
        .req();

    TestInvoker::new(&handler)
        .function_name("resize")
        .send()
        .await
        .assert_data(&json!("resize"));
}

// ============================================================================
// Properties
// ============================================================================

struct Slot<const N: usize>;

const MAX_STAGES: usize = 6;

fn slot<const N: usize>(fail: bool, recorder: &Recorder) -> Arc<dyn Creator> {
    let recorder = recorder.clone();
    Arc::new(service("slot", move |_request, lifecycle: RequestLifecycle| {
        let recorder = recorder.clone();
        async move {
            if fail {
                return Err(TypedError::new("SlotFailed").into());
            }
            let end = recorder.clone();
            lifecycle.on_end(move || async move {
                end.record(format!("end:{N}"));
                Ok(())
            })?;
            let destroy = recorder.clone();
            lifecycle.on_destroy(move || async move {
                destroy.record(format!("destroy:{N}"));
                Ok(())
            })?;
            Ok(Service::new().with(Slot::<N>))
        }
    }))
}

fn slot_at(index: usize, fail: bool, recorder: &Recorder) -> Arc<dyn Creator> {
    match index {
        0 => slot::<0>(fail, recorder),
        1 => slot::<1>(fail, recorder),
        2 => slot::<2>(fail, recorder),
        3 => slot::<3>(fail, recorder),
        4 => slot::<4>(fail, recorder),
        _ => slot::<5>(fail, recorder),
    }
}

fn filled_slots(service: &Service) -> Vec<usize> {
    [
        service.contains::<Slot<0>>(),
        service.contains::<Slot<1>>(),
        service.contains::<Slot<2>>(),
        service.contains::<Slot<3>>(),
        service.contains::<Slot<4>>(),
        service.contains::<Slot<5>>(),
    ]
    .iter()
    .enumerate()
    .filter_map(|(index, filled)| filled.then_some(index))
    .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_failing_stage_sees_earlier_contributions_and_ordered_hooks(
        stages in 1usize..=MAX_STAGES,
        failing in 0usize..=MAX_STAGES,
    ) {
        let failing = failing.min(stages);
        let recorder = Recorder::new();
        let mut pipeline = Pipeline::new();
        for index in 0..stages {
            pipeline = pipeline.srv_arc(slot_at(index, index == failing, &recorder));
        }
        let handler = pipeline
            .ok(|request, _| async move { Ok(Flow::next(filled_slots(request.service()))) })
            .fail(|request, _| async move { Ok(Flow::next(filled_slots(request.service()))) })
            .req();

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let response = runtime.block_on(TestInvoker::new(&handler).send());

        let expected: Vec<usize> = (0..failing).collect();
        response.assert_data(&json!(expected));

        let ends: Vec<String> = (0..failing).map(|i| format!("end:{i}")).collect();
        let destroys: Vec<String> = (0..failing).rev().map(|i| format!("destroy:{i}")).collect();
        prop_assert_eq!(recorder.with_prefix("end:"), ends);
        prop_assert_eq!(recorder.with_prefix("destroy:"), destroys);
        if let (Some(last_end), Some(first_destroy)) = (
            recorder.entries().iter().rposition(|e| e.starts_with("end:")),
            recorder.position(&format!("destroy:{}", failing.saturating_sub(1))),
        ) {
            prop_assert!(last_end < first_destroy);
        }
    }
}

#[test]
fn test_pipeline_definitions_are_immutable() {
    let base = Pipeline::new().ok(|_, _| async { Ok(Flow::next(1)) });
    let extended = base.ok(|_, _| async { Ok(Flow::next(2)) });

    assert_eq!(base.handler_counts().ok, 1);
    assert_eq!(extended.handler_counts().ok, 2);

    let value: Value = tokio_test::block_on(async {
        TestInvoker::new(&base.req()).send().await.json_value().unwrap()
    });
    assert_eq!(value["data"], 1);
}
