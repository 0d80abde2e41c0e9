//! Liveness check.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Handler, MessageContext, Plugin, PluginContext, PluginError, bind};
use crate::commands::CommandFilter;

pub struct Ping {
    filter: CommandFilter,
}

pub fn load(ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
    Ok(Arc::new(Ping {
        filter: ctx.command(["ping"]).me_only(),
    }))
}

impl Ping {
    async fn ping(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        ctx.edit("Pong!").await
    }
}

#[async_trait]
impl Plugin for Ping {
    fn name(&self) -> &'static str {
        "Ping"
    }

    fn description(&self) -> &'static str {
        "check whether the bot is alive"
    }

    fn register_handlers(self: Arc<Self>) -> Vec<Handler> {
        vec![Handler::new(self.filter.clone(), bind(&self, Self::ping))]
    }
}
