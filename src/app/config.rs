use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "progression_pool", version, about = "Queue arithmetic progression tasks and run them on a fixed worker pool")]
pub struct Config {
    /// Max workers at the same time
    #[arg(short = 'N', long = "workers", env = "POOL_WORKERS", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub workers: u32,

    #[arg(long, env = "POOL_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "POOL_PORT", default_value_t = 8080)]
    pub port: u16,
}

impl Config {
    pub fn worker_count(&self) -> usize {
        self.workers as usize
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
