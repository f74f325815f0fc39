//! Built-in tools over external backend traits.
//!
//! The memo and schedule CRUD layers are external collaborators; the tools
//! here only translate between the model's JSON arguments and the backend
//! calls, and render results in the fixed formats the rest of the system
//! keys on (success markers included).

pub mod memo;
pub mod schedule;
pub mod system;

use std::sync::Arc;

use av_domain::error::Result;

use crate::registry::{ToolFactory, ToolRegistry};
use crate::ToolCategory;

/// Register the built-in tool set against the given backends.
pub fn register_builtin(
    registry: &ToolRegistry,
    memos: Arc<dyn memo::MemoBackend>,
    schedules: Arc<dyn schedule::ScheduleBackend>,
) -> Result<()> {
    {
        let memos = memos.clone();
        registry.register_factory(ToolFactory::new(
            "memo_search",
            "Search the user's memos by keyword",
            ToolCategory::Memo,
            vec!["memo".into(), "read".into()],
            move |user_id| Arc::new(memo::MemoSearchTool::new(memos.clone(), user_id)),
        ))?;
    }
    {
        registry.register_factory(ToolFactory::new(
            "memo_create",
            "Create a new memo for the user",
            ToolCategory::Memo,
            vec!["memo".into(), "write".into()],
            move |user_id| Arc::new(memo::MemoCreateTool::new(memos.clone(), user_id)),
        ))?;
    }
    {
        let schedules_q = schedules.clone();
        registry.register_factory(ToolFactory::new(
            "schedule_query",
            "Query the user's schedule for a time range",
            ToolCategory::Schedule,
            vec!["schedule".into(), "read".into()],
            move |user_id| {
                Arc::new(schedule::ScheduleQueryTool::new(schedules_q.clone(), user_id))
            },
        ))?;
    }
    {
        registry.register_factory(ToolFactory::new(
            "schedule_add",
            "Add an item to the user's schedule",
            ToolCategory::Schedule,
            vec!["schedule".into(), "write".into()],
            move |user_id| Arc::new(schedule::ScheduleAddTool::new(schedules.clone(), user_id)),
        ))?;
    }
    registry.register(Arc::new(system::CurrentTimeTool))?;
    Ok(())
}
