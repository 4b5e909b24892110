//! 连签加成策略

/// 奖励加成策略
pub trait BonusPolicy: Send + Sync {
    /// 根据基础数量和连签天数计算最终数量
    fn apply(&self, base_amount: i64, streak_days: Option<u32>) -> i64;
}

/// 不加成
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBonus;

impl BonusPolicy for NoBonus {
    fn apply(&self, base_amount: i64, _streak_days: Option<u32>) -> i64 {
        base_amount
    }
}

/// 每连签 `every_days` 天当天奖励乘以 `multiplier`
///
/// 例如 `every_days = 7, multiplier = 2`：第 7、14、21... 天翻倍。
#[derive(Debug, Clone, Copy)]
pub struct StreakMultiplier {
    pub every_days: u32,
    pub multiplier: i64,
}

impl StreakMultiplier {
    pub fn new(every_days: u32, multiplier: i64) -> Self {
        Self {
            every_days,
            multiplier,
        }
    }

    /// 7 日连签翻倍
    pub fn weekly_double() -> Self {
        Self::new(7, 2)
    }
}

impl BonusPolicy for StreakMultiplier {
    fn apply(&self, base_amount: i64, streak_days: Option<u32>) -> i64 {
        match streak_days {
            Some(days) if self.every_days > 0 && days > 0 && days % self.every_days == 0 => {
                base_amount.saturating_mul(self.multiplier)
            }
            _ => base_amount,
        }
    }
}
