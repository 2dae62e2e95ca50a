use std::io::{self, BufRead, Write};

use quiz_core::model::{AreaKey, OptionAlias, SessionState, Tier};
use quiz_core::xp::area_level;
use services::{
    Advance, QuizConfig, QuizServices, QuizSessionEngine, SessionOutcome, format_elapsed,
};

type AppResult = Result<(), Box<dyn std::error::Error>>;

fn prompt(label: &str) -> io::Result<Option<String>> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn confirm(label: &str) -> io::Result<bool> {
    let answer = prompt(label)?.unwrap_or_default();
    Ok(!answer.eq_ignore_ascii_case("n"))
}

fn show_question(session: &QuizSessionEngine) {
    let Some(question) = session.current_question() else {
        return;
    };
    let progress = session.progress();
    println!();
    println!(
        "[{}/{}] {}  {}",
        progress.current_index + 1,
        progress.total,
        session.formatted_time(),
        question.area()
    );
    println!("{}", question.prompt());
    for option in question.options() {
        println!("  {}) {}", option.alias, option.text);
    }
}

async fn save_and_quit(session: &mut QuizSessionEngine) -> AppResult {
    session.save_snapshot().await?;
    let report = session.abandon()?;
    println!(
        "Saved. You answered {} of {} questions; resume with the same options.",
        report.answered, report.total
    );
    Ok(())
}

async fn prepare(session: &mut QuizSessionEngine) -> Result<bool, Box<dyn std::error::Error>> {
    session.initialize().await?;
    if session.is_blocked() {
        return Ok(false);
    }

    if let Err(err) = session.load_questions().await {
        println!("Could not load questions: {err}");
        while session.state() == SessionState::Error {
            if !confirm("Retry? [Y/n] ")? {
                return Err(err.into());
            }
            if let Err(retry) = session.reload().await {
                println!("Still failing: {retry}");
            }
        }
    }
    Ok(session.state() == SessionState::Ready)
}

/// Interactive question loop on stdin/stdout.
pub(crate) async fn run_session(services: &QuizServices, config: QuizConfig) -> AppResult {
    let tier = config.tier;
    let mut session = services.new_session(config);

    if !prepare(&mut session).await? {
        if let Some(area) = session.area() {
            println!("No attempts left today for {area}. Come back tomorrow or go premium.");
        }
        return Ok(());
    }
    if let Some(remaining) = session.remaining_attempts() {
        println!("Attempts left today: {remaining}");
    }

    let user = services.current_user();
    if services.snapshots().load(&user).await?.is_some()
        && confirm("Resume your saved session? [Y/n] ")?
        && !session.restore_snapshot().await?
    {
        println!("The saved session has expired or belongs to another quiz; starting fresh.");
    }

    session.start()?;
    show_question(&session);

    loop {
        let label = if session.state() == SessionState::Paused {
            "(paused) p to resume > "
        } else {
            "> "
        };
        let Some(input) = prompt(label)? else {
            return save_and_quit(&mut session).await;
        };

        match input.as_str() {
            "" => continue,
            "q" | "Q" => return save_and_quit(&mut session).await,
            "p" | "P" => {
                session.toggle_pause()?;
                if session.state() == SessionState::Paused {
                    println!("Paused at {}.", session.formatted_time());
                } else {
                    show_question(&session);
                }
                continue;
            }
            _ => {}
        }

        let mut letters = input.chars();
        let (Some(letter), None) = (letters.next(), letters.next()) else {
            println!("Type the letter of your answer.");
            continue;
        };
        let chosen = match OptionAlias::new(letter) {
            Ok(alias) => alias,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        if let Err(err) = session.select_answer(chosen) {
            println!("{err}");
            continue;
        }
        let feedback = session.submit_answer()?;
        if feedback.is_correct {
            println!("Correct!");
        } else {
            println!("Wrong, the answer is {}.", feedback.correct_alias);
        }
        if !feedback.explanation.is_empty() {
            println!("{}", feedback.explanation);
        }

        match session.advance().await? {
            Advance::Next { .. } => show_question(&session),
            Advance::Completed(outcome) => {
                print_outcome(services, &session, &outcome, tier).await?;
                return Ok(());
            }
        }
    }
}

async fn print_outcome(
    services: &QuizServices,
    session: &QuizSessionEngine,
    outcome: &SessionOutcome,
    tier: Tier,
) -> AppResult {
    println!();
    println!(
        "Done: {}/{} correct ({}%) in {}.",
        outcome.correct,
        outcome.total,
        outcome.score,
        format_elapsed(outcome.elapsed_secs)
    );
    println!(
        "XP +{} (base {}, accuracy bonus {}, pace bonus {})",
        outcome.xp.total(),
        outcome.xp.base,
        outcome.xp.accuracy_bonus,
        outcome.xp.pace_bonus
    );

    let user = services.current_user();
    let levels = services.progress().levels(&user).await?;
    println!("Level {} ({} XP)", levels.level, levels.total_xp);

    if let (Tier::Free, Some(area)) = (tier, session.area()) {
        let remaining = services.trials().get_remaining(&user, area).await?;
        println!("Attempts left today for {area}: {remaining}");
    }
    Ok(())
}

/// Overall and per-area statistics for the current user.
pub(crate) async fn print_stats(services: &QuizServices, area: Option<&AreaKey>) -> AppResult {
    let user = services.current_user();
    let stats = services.progress().get_stats(&user).await?;
    let levels = services.progress().levels(&user).await?;

    println!("User: {user}");
    println!(
        "Answered {} questions, {} correct ({}%), {} studied",
        stats.total_completed,
        stats.total_correct,
        stats.accuracy,
        format_elapsed(stats.total_time_secs)
    );
    println!("Streak: {} day(s)", stats.current_streak);
    println!("Level {} ({} XP)", levels.level, levels.total_xp);

    let areas = match area {
        Some(area) => vec![area.clone()],
        None => services.questions().areas().await?,
    };
    let max = services.trials().max_attempts();
    for area in &areas {
        let area_stats = services.progress().get_area_stats(&user, area).await?;
        let remaining = services.trials().get_remaining(&user, area).await?;
        let area_xp = levels.areas.get(area).map_or(0, |level| level.xp);
        println!(
            "  {area}: {}/{} correct ({}%), level {}, attempts left today {remaining}/{max}",
            area_stats.total_correct,
            area_stats.total_completed,
            area_stats.accuracy,
            area_level(area_xp)
        );
    }
    Ok(())
}
