pub mod routes {
    pub const HEALTH: &str = "/health";

    pub const JOBS: &str = "/api/jobs/{capability}";
    pub const JOB_BY_ID: &str = "/api/jobs/{capability}/{id}";
    pub const JOB_ATTACH: &str = "/api/jobs/{capability}/{id}/attach";
    pub const JOBS_RUN: &str = "/api/jobs/{capability}/run";

    pub const REMOVE_BACKGROUND: &str = "/api/remove-background";
    pub const DOWNLOAD: &str = "/api/download";

    /// Public prefix under which persisted outputs are served.
    pub const OUTPUTS: &str = "/tmp";
    pub const OUTPUT_BY_NAME: &str = "/tmp/{name}";
}

pub mod env {
    pub const API_KEY: &str = "REPLICATE_API_KEY";
}
