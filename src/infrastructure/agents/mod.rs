pub mod http_agent_invoker;

pub use http_agent_invoker::HttpAgentInvoker;
