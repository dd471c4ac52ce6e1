//! Scripted agents for driving the coordinator without a backend

#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reportflow::workflow::ChartDescriptor;
use reportflow::{
    Agent, AgentError, AgentSet, RetryPolicy, RunContext, StageInput, StageName, StageOutput,
    WorkflowCoordinator,
};

pub type Behavior = Arc<
    dyn Fn(RunContext, StageInput) -> BoxFuture<'static, Result<StageOutput, AgentError>>
        + Send
        + Sync,
>;

/// Log of agent invocations shared by a set of scripted agents
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<(StageName, StageInput)>>>);

impl CallLog {
    pub fn stages(&self) -> Vec<StageName> {
        self.0.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    /// Section indexes the content agent was asked for
    pub fn sections(&self) -> Vec<usize> {
        let mut indexes: Vec<usize> = self
            .0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, input)| match input {
                StageInput::Section { index, .. } => Some(*index),
                StageInput::Whole => None,
            })
            .collect();
        indexes.sort_unstable();
        indexes.dedup();
        indexes
    }

    pub fn count(&self, stage: StageName) -> usize {
        self.stages().into_iter().filter(|s| *s == stage).count()
    }
}

pub struct ScriptedAgent {
    stage: StageName,
    log: CallLog,
    behavior: Behavior,
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn stage(&self) -> StageName {
        self.stage
    }

    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, ctx: &RunContext, input: StageInput) -> Result<StageOutput, AgentError> {
        self.log.0.lock().unwrap().push((self.stage, input.clone()));
        (self.behavior)(ctx.clone(), input).await
    }
}

pub fn agent<F>(stage: StageName, log: &CallLog, behavior: F) -> Arc<dyn Agent>
where
    F: Fn(RunContext, StageInput) -> BoxFuture<'static, Result<StageOutput, AgentError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(ScriptedAgent {
        stage,
        log: log.clone(),
        behavior: Arc::new(behavior),
    })
}

pub const TITLES: [&str; 5] = ["概述", "发展现状", "关键技术", "应用场景", "结论"];

pub fn body_for(title: &str) -> String {
    format!("{}部分的正文内容。", title)
}

pub fn outline(log: &CallLog) -> Arc<dyn Agent> {
    agent(StageName::Outline, log, |_, _| {
        Box::pin(async { Ok(StageOutput::Outline(TITLES.iter().map(|t| t.to_string()).collect())) })
    })
}

pub fn content(log: &CallLog) -> Arc<dyn Agent> {
    agent(StageName::Content, log, |_, input| {
        Box::pin(async move {
            match input {
                StageInput::Section { index, title } => Ok(StageOutput::SectionBody {
                    index,
                    body: body_for(&title),
                }),
                StageInput::Whole => Err(AgentError::permanent("content runs per section")),
            }
        })
    })
}

pub fn polish(log: &CallLog) -> Arc<dyn Agent> {
    agent(StageName::Polish, log, |ctx, _| {
        Box::pin(async move {
            let bodies = ctx
                .section_bodies()
                .ok_or_else(|| AgentError::permanent("no content"))?;
            Ok(StageOutput::Polish(
                bodies.iter().map(|b| format!("{}（润色）", b)).collect(),
            ))
        })
    })
}

pub fn chart(log: &CallLog, charts: Vec<ChartDescriptor>) -> Arc<dyn Agent> {
    agent(StageName::Chart, log, move |_, _| {
        let charts = charts.clone();
        Box::pin(async move { Ok(StageOutput::Chart(charts)) })
    })
}

/// Never answers; only a deadline or cancellation ends it
pub fn hanging(stage: StageName, log: &CallLog) -> Arc<dyn Agent> {
    agent(stage, log, |ctx, _| {
        Box::pin(async move {
            ctx.cancellation().cancelled().await;
            Err(AgentError::cancelled())
        })
    })
}

pub fn failing(stage: StageName, log: &CallLog, error: AgentError) -> Arc<dyn Agent> {
    agent(stage, log, move |_, _| {
        let error = error.clone();
        Box::pin(async move { Err(error) })
    })
}

/// Happy-path agents for every stage
pub fn agents(log: &CallLog) -> AgentSet {
    AgentSet::from_agents([outline(log), content(log), polish(log), chart(log, Vec::new())])
        .unwrap()
}

/// Retries without noticeable waiting
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::default()
        .without_jitter()
        .with_base_delay(Duration::from_millis(1))
        .with_timeout(Duration::from_secs(5))
}

pub fn coordinator(agents: AgentSet) -> WorkflowCoordinator {
    WorkflowCoordinator::new(agents).with_policy(fast_policy())
}
