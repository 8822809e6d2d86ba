//! 命令总线
//!
//! 处理器按命令类型字符串注册。执行顺序：查找处理器 → 校验 → 授权代理链 →
//! 处理器。注册只能在启动阶段通过 `&mut self` 完成，运行期的总线放在 `Arc`
//! 后面只读共享。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn, Instrument};

use crate::commands::{Command, CommandContext, CommandResult};
use crate::error::{ApplicationError, ApplicationResult};

/// 命令处理器
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: &CommandContext, command: &Command)
        -> ApplicationResult<CommandResult>;
}

/// 授权代理，返回错误即否决
#[async_trait]
pub trait AuthorizationProxy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn authorize(&self, ctx: &CommandContext, command: &Command) -> ApplicationResult<()>;
}

#[derive(Default)]
pub struct CommandBus {
    handlers: HashMap<&'static str, Arc<dyn CommandHandler>>,
    proxies: Vec<Arc<dyn AuthorizationProxy>>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同一命令类型重复注册返回错误
    pub fn register(
        &mut self,
        command_type: &'static str,
        handler: Arc<dyn CommandHandler>,
    ) -> ApplicationResult<()> {
        if self.handlers.contains_key(command_type) {
            return Err(ApplicationError::Conflict(format!(
                "命令处理器已注册: {command_type}"
            )));
        }
        self.handlers.insert(command_type, handler);
        info!(command_type, "注册命令处理器");
        Ok(())
    }

    /// 追加授权代理，按追加顺序执行
    pub fn add_proxy(&mut self, proxy: Arc<dyn AuthorizationProxy>) {
        info!(proxy = proxy.name(), "注册授权代理");
        self.proxies.push(proxy);
    }

    pub fn has_handler(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    pub async fn execute(
        &self,
        ctx: &CommandContext,
        command: &Command,
    ) -> ApplicationResult<CommandResult> {
        let command_type = command.command_type();
        let span = tracing::info_span!(
            "command",
            command_type,
            actor = %command.actor_id(),
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
        );

        async move {
            let handler = self
                .handlers
                .get(command_type)
                .cloned()
                .ok_or_else(|| ApplicationError::HandlerNotFound(command_type.to_string()))?;

            command.validate()?;

            for proxy in &self.proxies {
                if let Err(err) = proxy.authorize(ctx, command).await {
                    warn!(proxy = proxy.name(), error = %err, "命令被授权代理拒绝");
                    return Err(err);
                }
            }

            let result = handler.handle(ctx, command).await;
            match &result {
                Ok(res) => debug!(aggregate_id = %res.aggregate_id, "命令执行成功"),
                Err(err) => warn!(error = %err, "命令执行失败"),
            }
            result
        }
        .instrument(span)
        .await
    }
}
