use boifi_domain::{FaultAction, OptimizationSession, Trial};

/// Render a list of sessions as a plain-text table.
pub fn render_sessions_table(sessions: &[OptimizationSession]) -> String {
    if sessions.is_empty() {
        return "No sessions.\n".to_string();
    }
    let mut out = String::new();
    out.push_str(&format!(
        "{:<36}  {:<20}  {:<10}  {:>7}  {:>9}\n",
        "ID", "SERVICE", "STATUS", "TRIALS", "BEST"
    ));
    for session in sessions {
        let best = session
            .best
            .as_ref()
            .map(|b| format!("{:.2}", b.score))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<36}  {:<20}  {:<10}  {:>7}  {:>9}\n",
            session.id,
            session.service,
            format!("{:?}", session.status).to_lowercase(),
            session.trials.len(),
            best
        ));
    }
    out
}

/// Render one session's full detail, including its trial history and best result.
pub fn render_session_detail(session: &OptimizationSession) -> String {
    let mut out = String::new();
    out.push_str(&format!("Session:     {}\n", session.id));
    out.push_str(&format!("Service:     {}\n", session.service));
    out.push_str(&format!("Status:      {:?}\n", session.status));
    out.push_str(&format!("Created:     {}\n", session.created_at));
    if let Some(started) = session.started_at {
        out.push_str(&format!("Started:     {}\n", started));
    }
    if let Some(completed) = session.completed_at {
        out.push_str(&format!("Completed:   {}\n", completed));
    }
    out.push_str(&format!("Max trials:  {}\n", session.max_trials));
    out.push_str(&format!("Time budget: {}s\n", session.time_budget_secs));
    out.push('\n');

    if session.trials.is_empty() {
        out.push_str("No trials recorded yet.\n");
    } else {
        out.push_str(&format!("{:<6}  {:<10}  {:<24}  {:>8}\n", "TRIAL", "STATUS", "FAULT", "SEVERITY"));
        for trial in &session.trials {
            out.push_str(&render_trial_row(trial));
        }
    }
    out.push('\n');

    match &session.best {
        Some(best) => {
            out.push_str(&format!(
                "Best: trial {} scored {:.2} with {}\n",
                best.trial_id,
                best.score,
                render_fault(&best.fault.rule.fault)
            ));
        }
        None => out.push_str("Best: none yet\n"),
    }

    out
}

fn render_trial_row(trial: &Trial) -> String {
    let severity = trial
        .severity_score
        .as_ref()
        .map(|s| format!("{:.2}", s.total))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<6}  {:<10}  {:<24}  {:>8}\n",
        trial.trial_id,
        format!("{:?}", trial.status).to_lowercase(),
        render_fault(&trial.fault_plan.rule.fault),
        severity
    )
}

fn render_fault(action: &FaultAction) -> String {
    match action {
        FaultAction::Abort { http_status } => format!("abort({http_status})"),
        FaultAction::Delay { fixed_delay_ms } => format!("delay({fixed_delay_ms}ms)"),
    }
}
