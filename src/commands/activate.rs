//! Activate command

use anyhow::{bail, Result};

use crate::config::RuntimeContext;
use crate::output::print_output;

use super::one_shot_dashboard;

pub async fn run(ctx: &RuntimeContext, entity_id: &str) -> Result<()> {
    let dashboard = one_shot_dashboard(ctx).await?;
    let outcome = dashboard.activate(entity_id).await;

    if !outcome.success {
        bail!(
            "Failed to activate {entity_id}: {}",
            outcome.message.as_deref().unwrap_or("unknown error")
        );
    }

    if !ctx.global.quiet {
        print_output(ctx, &outcome)?;
    }
    Ok(())
}
