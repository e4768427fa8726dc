//! JSON-lines workloads for `tally simulate`.
//!
//! ```text
//! {"op":"create","id":1,"community":7,"author":1,"title":"hello"}
//! {"op":"vote","post":1,"user":2,"direction":1}
//! {"op":"advance","secs":3600}
//! {"op":"list","community":7,"ordering":"score"}
//! {"op":"flush"}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tally_engine::{
    CommunityId, Engine, EngineError, ListQuery, NewPost, OrderingKey, PostId, Timestamp, UserId,
    VoteDirection,
};
use tally_types::{Clock, ManualClock};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Step {
    Create {
        #[serde(default)]
        id: Option<PostId>,
        community: CommunityId,
        author: UserId,
        #[serde(default)]
        title: String,
        #[serde(default)]
        content: String,
    },
    Vote {
        post: PostId,
        user: UserId,
        direction: VoteDirection,
    },
    List {
        #[serde(default)]
        community: Option<CommunityId>,
        #[serde(default)]
        ordering: OrderingKey,
        #[serde(default = "first_page")]
        page: u64,
        #[serde(default = "page_size")]
        size: u64,
        #[serde(default)]
        search: Option<String>,
    },
    Count {
        post: PostId,
    },
    Status {
        post: PostId,
        user: UserId,
    },
    Advance {
        secs: u64,
    },
    Flush,
}

fn first_page() -> u64 {
    1
}

fn page_size() -> u64 {
    10
}

/// Result of one step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Created {
        post: PostId,
    },
    Accepted {
        post: PostId,
        user: UserId,
        direction: VoteDirection,
        delta: i64,
        score: i64,
    },
    Rejected {
        post: PostId,
        user: UserId,
        reason: String,
    },
    Listed {
        total: u64,
        ids: Vec<PostId>,
    },
    Counted {
        post: PostId,
        votes: i64,
        score: i64,
    },
    Status {
        post: PostId,
        user: UserId,
        direction: VoteDirection,
        durable: Option<VoteDirection>,
        acknowledged: bool,
    },
    Advanced {
        now: Timestamp,
    },
    Flushed {
        handled: usize,
    },
}

pub fn parse(text: &str) -> anyhow::Result<Vec<Step>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}: invalid step", n + 1))
        })
        .collect()
}

/// Run steps in order. Vote rejections are outcomes; every other engine
/// error aborts the run.
pub async fn run(
    engine: &Engine,
    clock: &ManualClock,
    steps: &[Step],
) -> anyhow::Result<Vec<Outcome>> {
    let mut outcomes = Vec::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        let outcome = execute(engine, clock, step)
            .await
            .with_context(|| format!("step {} failed", i + 1))?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

async fn execute(engine: &Engine, clock: &ManualClock, step: &Step) -> anyhow::Result<Outcome> {
    let outcome = match step.clone() {
        Step::Create {
            id,
            community,
            author,
            title,
            content,
        } => {
            let post = NewPost {
                community,
                author,
                title,
                content,
            };
            let post = match id {
                Some(id) => {
                    engine.create_post_with_id(id, post).await?;
                    id
                }
                None => engine.create_post(post).await?,
            };
            Outcome::Created { post }
        }
        Step::Vote {
            post,
            user,
            direction,
        } => match engine.submit_vote(post, user, direction).await {
            Ok(accepted) => Outcome::Accepted {
                post,
                user,
                direction,
                delta: accepted.receipt.delta,
                score: accepted.receipt.score,
            },
            Err(EngineError::Rejected(reason)) => Outcome::Rejected {
                post,
                user,
                reason: reason.to_string(),
            },
            Err(e) => return Err(e.into()),
        },
        Step::List {
            community,
            ordering,
            page,
            size,
            search,
        } => {
            let page = engine
                .list_ranked(&ListQuery {
                    community,
                    ordering,
                    page,
                    size,
                    search,
                })
                .await?;
            Outcome::Listed {
                total: page.total,
                ids: page.ids,
            }
        }
        Step::Count { post } => Outcome::Counted {
            post,
            votes: engine.vote_count(post)?,
            score: engine.score(post)?,
        },
        Step::Status { post, user } => {
            let status = engine.vote_status(post, user).await?;
            Outcome::Status {
                post,
                user,
                direction: status.direction,
                durable: status.durable,
                acknowledged: status.acknowledged,
            }
        }
        Step::Advance { secs } => {
            clock.advance(Duration::from_secs(secs));
            Outcome::Advanced { now: clock.now() }
        }
        Step::Flush => Outcome::Flushed {
            handled: engine.flush().await?,
        },
    };
    Ok(outcome)
}
