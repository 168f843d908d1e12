use serde::Deserialize;

use crate::models::QuizQuestion;

#[derive(Debug, Clone, Deserialize)]
pub struct QuizAnswer {
    pub question_id: i64,
    pub selected_option_id: i64,
}

/// Scores a submission against the stored question set. Single-correct MCQ
/// semantics only: a question awards its full points when the selected option
/// is the one flagged correct, otherwise nothing.
pub fn score_quiz(questions: &[QuizQuestion], answers: &[QuizAnswer]) -> i64 {
    let total_points: i64 = questions.iter().map(|q| q.points).sum();
    if total_points <= 0 {
        return 0;
    }

    let mut earned_points = 0i64;
    for question in questions {
        let Some(answer) = answers.iter().find(|a| a.question_id == question.id) else {
            continue;
        };
        let Some(correct) = question.options.iter().find(|o| o.is_correct) else {
            continue;
        };
        if answer.selected_option_id == correct.id {
            earned_points += question.points;
        }
    }

    ((earned_points as f64 / total_points as f64) * 100.0).round() as i64
}
