//! 自动化规则管理服务
//!
//! 发布、暂停只修改状态，不触碰历史执行记录。
//! 删除即归档，归档后不可编辑也不可重新发布。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::automation::ConditionEvaluator;
use crate::error::{EngineError, Result};
use crate::models::{Automation, AutomationDraft, AutomationStatus, ExecutionRecord};
use crate::repository::{AutomationRepositoryTrait, ExecutionRepositoryTrait};

const MAX_NAME_LEN: usize = 200;
const MAX_EXECUTION_PAGE: i64 = 500;

pub struct AutomationService {
    automations: Arc<dyn AutomationRepositoryTrait>,
    executions: Arc<dyn ExecutionRepositoryTrait>,
}

impl AutomationService {
    pub fn new(
        automations: Arc<dyn AutomationRepositoryTrait>,
        executions: Arc<dyn ExecutionRepositoryTrait>,
    ) -> Self {
        Self {
            automations,
            executions,
        }
    }

    /// 创建自动化，初始状态只能是 draft 或 published
    #[instrument(skip(self, draft), fields(business_id = %draft.business_id, name = %draft.name))]
    pub async fn create(&self, draft: AutomationDraft) -> Result<Automation> {
        let status = draft.status.unwrap_or_default();
        if !matches!(status, AutomationStatus::Draft | AutomationStatus::Published) {
            return Err(EngineError::Validation(format!(
                "创建时状态只能为 draft 或 published，实际为 {status}"
            )));
        }
        Self::validate_draft(&draft)?;

        let now = Utc::now();
        let automation = Automation {
            id: Uuid::now_v7(),
            business_id: draft.business_id,
            name: draft.name.trim().to_string(),
            description: draft.description,
            status,
            trigger_type: draft.trigger_type,
            trigger_config: draft.trigger_config,
            conditions: draft.conditions,
            actions: draft.actions,
            template_id: draft.template_id,
            total_enrolled: 0,
            active_enrolled: 0,
            total_executions: 0,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.automations.create(&automation).await?;
        info!(automation_id = %automation.id, status = %automation.status, "自动化已创建");
        Ok(automation)
    }

    /// 更新定义字段
    ///
    /// draft 中的 status 若与当前不同，按状态流转规则处理。计数器保持不变。
    #[instrument(skip(self, draft), fields(automation_id = %id))]
    pub async fn update(&self, id: Uuid, draft: AutomationDraft) -> Result<Automation> {
        let current = self.get(id).await?;
        if current.status == AutomationStatus::Archived {
            return Err(EngineError::InvalidStatusTransition {
                from: current.status.to_string(),
                to: "edit".to_string(),
            });
        }
        if draft.business_id != current.business_id {
            return Err(EngineError::Validation("不允许修改所属商户".to_string()));
        }
        Self::validate_draft(&draft)?;

        let expected = current.status;
        let status = match draft.status {
            Some(target) if target != current.status => {
                Self::check_transition(current.status, target)?;
                target
            }
            _ => current.status,
        };

        let automation = Automation {
            name: draft.name.trim().to_string(),
            description: draft.description,
            status,
            trigger_type: draft.trigger_type,
            trigger_config: draft.trigger_config,
            conditions: draft.conditions,
            actions: draft.actions,
            template_id: draft.template_id,
            updated_at: Utc::now(),
            ..current
        };

        self.automations.update(&automation, expected).await?;
        info!(status = %automation.status, "自动化已更新");
        Ok(automation)
    }

    pub async fn get(&self, id: Uuid) -> Result<Automation> {
        self.automations
            .get(id)
            .await?
            .ok_or_else(|| EngineError::AutomationNotFound(id.to_string()))
    }

    pub async fn list(
        &self,
        business_id: &str,
        status: Option<AutomationStatus>,
    ) -> Result<Vec<Automation>> {
        self.automations.list(business_id, status).await
    }

    /// 发布前重新校验定义，草稿可能保存了不完整的内容
    pub async fn publish(&self, id: Uuid) -> Result<Automation> {
        self.transition(id, AutomationStatus::Published).await
    }

    pub async fn pause(&self, id: Uuid) -> Result<Automation> {
        self.transition(id, AutomationStatus::Paused).await
    }

    /// 删除即归档
    pub async fn archive(&self, id: Uuid) -> Result<Automation> {
        self.transition(id, AutomationStatus::Archived).await
    }

    pub async fn executions(&self, id: Uuid, limit: i64) -> Result<Vec<ExecutionRecord>> {
        self.get(id).await?;
        self.executions
            .list_by_automation(id, limit.clamp(1, MAX_EXECUTION_PAGE))
            .await
    }

    #[instrument(skip(self), fields(automation_id = %id, target = %target))]
    async fn transition(&self, id: Uuid, target: AutomationStatus) -> Result<Automation> {
        let current = self.get(id).await?;
        if current.status == target {
            return Ok(current);
        }
        Self::check_transition(current.status, target)?;

        if target == AutomationStatus::Published {
            Self::validate_definition(
                &current.name,
                &current.template_id,
                &current.conditions,
                &current.actions,
            )?;
        }

        let from = current.status;
        let automation = Automation {
            status: target,
            updated_at: Utc::now(),
            ..current
        };
        self.automations.update(&automation, from).await?;
        info!(%from, "自动化状态已变更");
        Ok(automation)
    }

    fn check_transition(from: AutomationStatus, to: AutomationStatus) -> Result<()> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(EngineError::InvalidStatusTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    fn validate_draft(draft: &AutomationDraft) -> Result<()> {
        if draft.business_id.trim().is_empty() {
            return Err(EngineError::Validation("商户 ID 不能为空".to_string()));
        }
        Self::validate_definition(
            &draft.name,
            &draft.template_id,
            &draft.conditions,
            &draft.actions,
        )
    }

    fn validate_definition(
        name: &str,
        template_id: &str,
        conditions: &[crate::models::Condition],
        actions: &[crate::models::AutomationAction],
    ) -> Result<()> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(EngineError::Validation(format!(
                "名称不能为空且不超过{MAX_NAME_LEN}字符"
            )));
        }
        if template_id.trim().is_empty() {
            return Err(EngineError::Validation("必须绑定通行证模板".to_string()));
        }
        if actions.is_empty() {
            return Err(EngineError::Validation("至少需要一个动作".to_string()));
        }
        for action in actions {
            action.validate_config().map_err(EngineError::Validation)?;
        }
        for condition in conditions {
            ConditionEvaluator::validate(condition).map_err(EngineError::Validation)?;
        }
        Ok(())
    }
}
