pub mod analysis_coordinator;
pub mod auto_trade_checker;
pub mod rebalance_coordinator;
pub mod schedule_runner;
pub mod stale_sweeper;
pub mod trade_executor;

pub use analysis_coordinator::AnalysisCoordinator;
pub use auto_trade_checker::AutoTradeChecker;
pub use rebalance_coordinator::RebalanceCoordinator;
pub use schedule_runner::ScheduleRunner;
pub use stale_sweeper::StaleSweeper;
pub use trade_executor::TradeExecutor;
