//! End-to-end coordinator behavior with scripted agents

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::*;
use reportflow::workflow::{
    AggregationWarning, ChartDescriptor, ChartType, FailureKind, SkipReason,
};
use reportflow::{
    AgentError, AgentSet, CancelAck, ReportError, ReportRequest, RunResult, RunStatus, StageInput,
    StageName, StageOutput, StageStatus,
};

fn chart_for(section: &str) -> ChartDescriptor {
    ChartDescriptor {
        chart_type: ChartType::Bar,
        title: format!("{}对比", section),
        description: "各方案对比".to_string(),
        data_concept: String::new(),
        priority: 4,
        section: Some(section.to_string()),
    }
}

#[tokio::test]
async fn scenario_a_minimal_run_skips_disabled_stages() {
    let log = CallLog::default();
    let coordinator = coordinator(agents(&log));
    let id = coordinator
        .submit(
            ReportRequest::new("十字符主题测试")
                .with_formats(["markdown"])
                .with_polish(false)
                .with_charts(false),
        )
        .unwrap();

    let result = coordinator.wait(id).await.unwrap();
    let document = result.document().expect("document").clone();
    let titles: Vec<&str> = document.sections.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, TITLES);
    for section in &document.sections {
        assert_eq!(section.body, body_for(&section.title));
        assert!(section.charts.is_empty());
    }
    assert!(document.appendix.is_empty());

    let status = coordinator.get_status(id).unwrap();
    assert_eq!(status.status, RunStatus::Succeeded);
    assert_eq!(status.stage(StageName::Outline).unwrap().status, StageStatus::Succeeded);
    assert_eq!(status.stage(StageName::Content).unwrap().status, StageStatus::Succeeded);
    for stage in [StageName::Polish, StageName::Chart] {
        let report = status.stage(stage).unwrap();
        assert_eq!(report.status, StageStatus::Skipped);
        assert_eq!(report.skip_reason, Some(SkipReason::Disabled));
    }
    assert_eq!(log.count(StageName::Polish), 0);
    assert_eq!(log.count(StageName::Chart), 0);
    assert!(status.warnings.is_empty());
}

#[tokio::test]
async fn scenario_b_permanent_outline_error_fails_without_retry() {
    let log = CallLog::default();
    let agents = agents(&log).with_agent(failing(
        StageName::Outline,
        &log,
        AgentError::permanent("topic not understood"),
    ));
    let coordinator = coordinator(agents);
    let id = coordinator.submit(ReportRequest::new("量子计算产业化")).unwrap();

    let failure = match coordinator.wait(id).await.unwrap() {
        RunResult::Failed(failure) => failure,
        other => panic!("expected failure, got {:?}", other),
    };
    assert_eq!(failure.stage, Some(StageName::Outline));
    assert_eq!(failure.kind, FailureKind::Permanent);
    assert_eq!(failure.attempts, 1);
    assert_eq!(failure.message, "topic not understood");

    let status = coordinator.get_status(id).unwrap();
    let outline = status.stage(StageName::Outline).unwrap();
    assert_eq!(outline.status, StageStatus::Failed);
    assert_eq!(outline.attempt, 1);
    assert_eq!(log.count(StageName::Outline), 1);
    assert_eq!(log.count(StageName::Content), 0);
    assert_eq!(status.stage(StageName::Content).unwrap().status, StageStatus::Idle);
    assert!(coordinator.get_result(id).unwrap().document().is_none());
}

#[tokio::test]
async fn scenario_c_transient_content_errors_are_retried() {
    let log = CallLog::default();
    let flaky = agent(StageName::Content, &log, |ctx, input| {
        Box::pin(async move {
            if ctx.attempt < 3 {
                return Err(AgentError::transient("backend busy"));
            }
            match input {
                StageInput::Section { index, title } => Ok(StageOutput::SectionBody {
                    index,
                    body: body_for(&title),
                }),
                StageInput::Whole => Err(AgentError::permanent("unexpected input")),
            }
        })
    });
    let coordinator = coordinator(agents(&log).with_agent(flaky));
    let id = coordinator.submit(ReportRequest::new("新能源汽车市场")).unwrap();

    let result = coordinator.wait(id).await.unwrap();
    assert!(result.document().is_some());

    let status = coordinator.get_status(id).unwrap();
    assert_eq!(status.status, RunStatus::Succeeded);
    let content = status.stage(StageName::Content).unwrap();
    assert_eq!(content.status, StageStatus::Succeeded);
    assert_eq!(content.attempt, 3);
    assert_eq!(log.count(StageName::Content), TITLES.len() * 3);
    assert_eq!(status.sections_completed, TITLES.len());
}

#[tokio::test(start_paused = true)]
async fn scenario_d_chart_timeouts_degrade_to_warning() {
    let log = CallLog::default();
    let agents = agents(&log).with_agent(hanging(StageName::Chart, &log));
    let coordinator = coordinator(agents).with_policy(
        fast_policy()
            .with_max_attempts(3)
            .with_timeout(Duration::from_millis(50)),
    );
    let id = coordinator.submit(ReportRequest::new("智慧城市建设")).unwrap();

    let result = coordinator.wait(id).await.unwrap();
    let RunResult::Succeeded {
        document, warnings, ..
    } = result
    else {
        panic!("expected success");
    };
    assert_eq!(document.chart_count(), 0);
    assert!(document.appendix.is_empty());
    assert!(matches!(
        warnings.as_slice(),
        [AggregationWarning::StageDegraded { stage: StageName::Chart, .. }]
    ));

    let status = coordinator.get_status(id).unwrap();
    let chart = status.stage(StageName::Chart).unwrap();
    assert_eq!(chart.status, StageStatus::Skipped);
    assert_eq!(chart.attempt, 3);
    assert!(matches!(chart.skip_reason, Some(SkipReason::Degraded(ref r)) if r.contains("timed out")));
    assert_eq!(log.count(StageName::Chart), 3);
    assert_eq!(status.stage(StageName::Polish).unwrap().status, StageStatus::Succeeded);
}

#[tokio::test]
async fn scenario_e_cancel_mid_content_discards_partial_sections() {
    let log = CallLog::default();
    let blocking = agent(StageName::Content, &log, |ctx, input| {
        Box::pin(async move {
            let StageInput::Section { index, title } = input else {
                return Err(AgentError::permanent("unexpected input"));
            };
            if index < 2 {
                return Ok(StageOutput::SectionBody {
                    index,
                    body: body_for(&title),
                });
            }
            ctx.cancellation().cancelled().await;
            Err(AgentError::cancelled())
        })
    });
    let coordinator = coordinator(agents(&log).with_agent(blocking));
    let id = coordinator.submit(ReportRequest::new("人工智能伦理")).unwrap();

    let mut receiver = coordinator.watch(id).unwrap();
    receiver
        .wait_for(|state| state.sections_completed >= 2)
        .await
        .unwrap();
    assert_eq!(coordinator.cancel(id).unwrap(), CancelAck::Requested);

    assert_eq!(coordinator.wait(id).await.unwrap(), RunResult::Cancelled);
    assert_eq!(coordinator.get_result(id).unwrap(), RunResult::Cancelled);

    let state = coordinator.watch(id).unwrap().borrow().clone();
    assert_eq!(state.status, RunStatus::Cancelled);
    assert!(state.document.is_none());
    assert!(state.stages.iter().all(|s| s.output.is_none()));
    let content = state.stage(StageName::Content).unwrap();
    assert_eq!(content.status, StageStatus::Failed);
    assert_eq!(content.error.as_deref(), Some("cancelled"));
    assert_eq!(state.stage(StageName::Polish).unwrap().status, StageStatus::Idle);
    assert_eq!(log.count(StageName::Polish), 0);

    assert_eq!(
        coordinator.cancel(id).unwrap(),
        CancelAck::AlreadyTerminal(RunStatus::Cancelled)
    );
}

#[tokio::test]
async fn content_failure_drains_in_flight_sections() {
    let log = CallLog::default();
    let released = Arc::new(AtomicBool::new(false));
    let flag = released.clone();
    let content = agent(StageName::Content, &log, move |_, input| {
        let flag = flag.clone();
        Box::pin(async move {
            let StageInput::Section { index, title } = input else {
                return Err(AgentError::permanent("unexpected input"));
            };
            match index {
                0 => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(StageOutput::SectionBody {
                        index,
                        body: body_for(&title),
                    })
                }
                1 => Err(AgentError::permanent("section rejected")),
                _ => Ok(StageOutput::SectionBody {
                    index,
                    body: body_for(&title),
                }),
            }
        })
    });
    let coordinator = coordinator(agents(&log).with_agent(content)).with_concurrency(4, 2);
    let id = coordinator.submit(ReportRequest::new("供应链金融风险")).unwrap();

    let RunResult::Failed(failure) = coordinator.wait(id).await.unwrap() else {
        panic!("expected failure");
    };
    assert_eq!(failure.stage, Some(StageName::Content));
    assert_eq!(failure.kind, FailureKind::Permanent);

    // The in-flight section finished; nothing new started after the failure
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(log.sections(), vec![0, 1]);

    let status = coordinator.get_status(id).unwrap();
    assert_eq!(status.status, RunStatus::Failed);
    assert_eq!(status.sections_completed, 1);
    assert_eq!(status.stage(StageName::Polish).unwrap().status, StageStatus::Idle);
    assert_eq!(status.stage(StageName::Chart).unwrap().status, StageStatus::Idle);
}

#[tokio::test]
async fn optional_polish_failure_keeps_content() {
    let log = CallLog::default();
    let agents = agents(&log).with_agent(failing(
        StageName::Polish,
        &log,
        AgentError::transient("rate limited"),
    ));
    let coordinator = coordinator(agents);
    let id = coordinator.submit(ReportRequest::new("云原生架构演进")).unwrap();

    let RunResult::Succeeded {
        document, warnings, ..
    } = coordinator.wait(id).await.unwrap()
    else {
        panic!("expected success");
    };
    for section in &document.sections {
        assert_eq!(section.body, body_for(&section.title));
    }
    assert_eq!(
        warnings,
        vec![AggregationWarning::StageDegraded {
            stage: StageName::Polish,
            reason: "rate limited".to_string(),
        }]
    );
    assert_eq!(log.count(StageName::Polish), 3);
}

#[tokio::test]
async fn required_chart_failure_fails_run() {
    let log = CallLog::default();
    let agents = agents(&log).with_agent(failing(
        StageName::Chart,
        &log,
        AgentError::permanent("no data"),
    ));
    let coordinator = coordinator(agents);
    let mut request = ReportRequest::new("跨境电商物流");
    request.require_charts = true;
    let id = coordinator.submit(request).unwrap();

    let RunResult::Failed(failure) = coordinator.wait(id).await.unwrap() else {
        panic!("expected failure");
    };
    assert_eq!(failure.stage, Some(StageName::Chart));
    assert!(coordinator.get_status(id).unwrap().warnings.is_empty());
}

#[tokio::test]
async fn charts_attach_to_sections_and_orphans_warn() {
    let log = CallLog::default();
    let charts = vec![chart_for("关键技术"), chart_for("不存在的章节")];
    let agents = agents(&log).with_agent(chart(&log, charts));
    let coordinator = coordinator(agents);
    let id = coordinator.submit(ReportRequest::new("工业互联网平台")).unwrap();

    let RunResult::Succeeded {
        document, warnings, ..
    } = coordinator.wait(id).await.unwrap()
    else {
        panic!("expected success");
    };
    let section = document
        .sections
        .iter()
        .find(|s| s.title == "关键技术")
        .unwrap();
    assert_eq!(section.charts.len(), 1);
    assert_eq!(document.chart_count(), 1);
    assert!(matches!(
        warnings.as_slice(),
        [AggregationWarning::OrphanChart { section, .. }] if section == "不存在的章节"
    ));
    // Polished bodies replace the drafts
    assert!(document.sections.iter().all(|s| s.body.ends_with("（润色）")));
}

#[tokio::test]
async fn stages_start_after_their_dependencies() {
    let log = CallLog::default();
    let coordinator = coordinator(agents(&log));
    let id = coordinator.submit(ReportRequest::new("数字人民币推广")).unwrap();
    coordinator.wait(id).await.unwrap();

    let stages = log.stages();
    assert_eq!(stages[0], StageName::Outline);
    let last_content = stages
        .iter()
        .rposition(|s| *s == StageName::Content)
        .unwrap();
    let first_downstream = stages
        .iter()
        .position(|s| matches!(s, StageName::Polish | StageName::Chart))
        .unwrap();
    assert!(last_content < first_downstream);
    assert_eq!(log.sections(), (0..TITLES.len()).collect::<Vec<_>>());

    let state = coordinator.watch(id).unwrap().borrow().clone();
    let content_started = state.stage(StageName::Content).unwrap().started_at.unwrap();
    let outline_finished = state.stage(StageName::Outline).unwrap().finished_at.unwrap();
    assert!(content_started >= outline_finished);
}

#[tokio::test]
async fn identical_outputs_give_identical_documents() {
    let log = CallLog::default();
    let coordinator = coordinator(agents(&log));
    let first = coordinator.submit(ReportRequest::new("区块链溯源应用")).unwrap();
    let second = coordinator.submit(ReportRequest::new("区块链溯源应用")).unwrap();

    let a = coordinator.wait(first).await.unwrap();
    let b = coordinator.wait(second).await.unwrap();
    let (a, b) = (a.document().unwrap(), b.document().unwrap());
    assert_eq!(a, b);
    assert_eq!(a.fingerprint, b.fingerprint);
    assert_eq!(coordinator.runs().len(), 2);
}

#[tokio::test]
async fn invalid_requests_never_start() {
    let log = CallLog::default();
    let coordinator = coordinator(agents(&log));

    for request in [
        ReportRequest::new("   "),
        ReportRequest::new("短"),
        ReportRequest::new("有效的主题名称").with_formats(Vec::<String>::new()),
        ReportRequest::new("有效的主题名称").with_formats(["pdf"]),
        ReportRequest::new("有效的主题名称").with_target_length(0),
    ] {
        assert!(matches!(
            coordinator.submit(request),
            Err(ReportError::Validation(_))
        ));
    }
    assert!(coordinator.runs().is_empty());
    assert!(log.stages().is_empty());
}

#[tokio::test]
async fn agent_panic_fails_the_stage() {
    let log = CallLog::default();
    let panicking = common::agent(StageName::Outline, &log, |_, _| {
        Box::pin(async { panic!("outline agent bug") })
    });
    let coordinator = coordinator(AgentSet::from_agents([
        panicking,
        content(&log),
        polish(&log),
        chart(&log, Vec::new()),
    ])
    .unwrap());
    let id = coordinator.submit(ReportRequest::new("自动驾驶法规")).unwrap();

    let RunResult::Failed(failure) = coordinator.wait(id).await.unwrap() else {
        panic!("expected failure");
    };
    assert_eq!(failure.stage, Some(StageName::Outline));
    assert_eq!(failure.kind, FailureKind::Internal);
}

#[tokio::test(start_paused = true)]
async fn wait_timeout_gives_up_while_run_continues() {
    let log = CallLog::default();
    let agents = agents(&log).with_agent(hanging(StageName::Outline, &log));
    let coordinator = coordinator(agents);
    let id = coordinator.submit(ReportRequest::new("城市更新与存量改造")).unwrap();

    let waited = coordinator
        .wait_timeout(id, Duration::from_millis(100))
        .await;
    assert!(matches!(waited, Err(ReportError::Timeout { .. })));
    assert_eq!(coordinator.get_result(id).unwrap(), RunResult::Pending);

    assert_eq!(coordinator.cancel(id).unwrap(), CancelAck::Requested);
    assert_eq!(coordinator.wait(id).await.unwrap(), RunResult::Cancelled);
}

#[tokio::test]
async fn cancel_waits_for_agents_to_wind_down() {
    let log = CallLog::default();
    let started = Arc::new(tokio::sync::Notify::new());
    let cleaned_up = Arc::new(AtomicBool::new(false));
    let outline = {
        let started = Arc::clone(&started);
        let cleaned_up = Arc::clone(&cleaned_up);
        agent(StageName::Outline, &log, move |ctx, _| {
            let started = Arc::clone(&started);
            let cleaned_up = Arc::clone(&cleaned_up);
            Box::pin(async move {
                started.notify_one();
                ctx.cancellation().cancelled().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                cleaned_up.store(true, Ordering::SeqCst);
                Err(AgentError::cancelled())
            })
        })
    };
    let coordinator = coordinator(agents(&log).with_agent(outline));
    let id = coordinator.submit(ReportRequest::new("数据要素市场化配置")).unwrap();

    started.notified().await;
    assert_eq!(coordinator.cancel(id).unwrap(), CancelAck::Requested);
    // Still running until the agent has returned
    assert_eq!(coordinator.get_status(id).unwrap().status, RunStatus::Running);
    assert!(!cleaned_up.load(Ordering::SeqCst));

    assert_eq!(coordinator.wait(id).await.unwrap(), RunResult::Cancelled);
    assert!(cleaned_up.load(Ordering::SeqCst));
    let status = coordinator.get_status(id).unwrap();
    assert_eq!(status.status, RunStatus::Cancelled);
    assert_eq!(log.count(StageName::Outline), 1);
}
