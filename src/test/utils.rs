use crate::error::AppError;
use crate::models::{ContentType, EnrollmentStatus};
use chrono::{Duration, Utc};
use rocket::http::Header;
use rocket::local::asynchronous::Client;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::Once;

static INIT: Once = Once::new();

pub struct TestWorker {
    pub name: String,
    pub company_id: i64,
    pub years_experience: i64,
}

pub struct TestLevel {
    pub course: String,
    pub number: i64,
    pub completion_window_days: i64,
    pub fast_track_experience_required: Option<i64>,
}

pub struct TestContent {
    pub course: String,
    pub number: i64,
    pub title: String,
    pub content_type: ContentType,
    pub sequence_order: i64,
    pub min_watch_percentage: i64,
    pub passing_score: Option<i64>,
    pub retry_threshold: Option<i64>,
    pub max_attempts_allowed: Option<i64>,
    pub is_final_exam: bool,
}

pub struct TestQuestion {
    pub content_title: String,
    pub prompt: String,
    pub points: i64,
    pub options: Vec<(String, bool)>,
}

pub struct TestOrder {
    pub company_id: i64,
    pub items: Vec<(String, String, i64)>,
}

pub struct TestEnrollment {
    pub worker: String,
    pub course: String,
    pub number: i64,
    pub status: EnrollmentStatus,
    pub start_days_ago: i64,
    pub deadline_days_from_now: i64,
    pub completion_days_ago: Option<i64>,
}

#[derive(Default)]
pub struct TestDbBuilder {
    workers: Vec<TestWorker>,
    courses: Vec<String>,
    levels: Vec<TestLevel>,
    contents: Vec<TestContent>,
    questions: Vec<TestQuestion>,
    orders: Vec<TestOrder>,
    enrollments: Vec<TestEnrollment>,
}

impl TestDbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker(mut self, name: &str, company_id: i64, years_experience: i64) -> Self {
        self.workers.push(TestWorker {
            name: name.to_string(),
            company_id,
            years_experience,
        });
        self
    }

    pub fn course(mut self, name: &str) -> Self {
        self.courses.push(name.to_string());
        self
    }

    pub fn level(mut self, course: &str, number: i64, completion_window_days: i64) -> Self {
        self.levels.push(TestLevel {
            course: course.to_string(),
            number,
            completion_window_days,
            fast_track_experience_required: None,
        });
        self
    }

    pub fn level_with_fast_track(
        mut self,
        course: &str,
        number: i64,
        completion_window_days: i64,
        fast_track_years: i64,
    ) -> Self {
        self.levels.push(TestLevel {
            course: course.to_string(),
            number,
            completion_window_days,
            fast_track_experience_required: Some(fast_track_years),
        });
        self
    }

    pub fn video(
        mut self,
        course: &str,
        number: i64,
        title: &str,
        sequence_order: i64,
        min_watch_percentage: i64,
    ) -> Self {
        self.contents.push(TestContent {
            course: course.to_string(),
            number,
            title: title.to_string(),
            content_type: ContentType::Video,
            sequence_order,
            min_watch_percentage,
            passing_score: None,
            retry_threshold: None,
            max_attempts_allowed: None,
            is_final_exam: false,
        });
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn quiz(
        mut self,
        course: &str,
        number: i64,
        title: &str,
        sequence_order: i64,
        passing_score: Option<i64>,
        retry_threshold: Option<i64>,
        max_attempts_allowed: Option<i64>,
        is_final_exam: bool,
    ) -> Self {
        self.contents.push(TestContent {
            course: course.to_string(),
            number,
            title: title.to_string(),
            content_type: ContentType::Questionnaire,
            sequence_order,
            min_watch_percentage: 0,
            passing_score,
            retry_threshold,
            max_attempts_allowed,
            is_final_exam,
        });
        self
    }

    pub fn question(
        mut self,
        content_title: &str,
        prompt: &str,
        points: i64,
        options: &[(&str, bool)],
    ) -> Self {
        self.questions.push(TestQuestion {
            content_title: content_title.to_string(),
            prompt: prompt.to_string(),
            points,
            options: options
                .iter()
                .map(|(label, correct)| (label.to_string(), *correct))
                .collect(),
        });
        self
    }

    pub fn order(mut self, company_id: i64, items: &[(&str, &str, i64)]) -> Self {
        self.orders.push(TestOrder {
            company_id,
            items: items
                .iter()
                .map(|(worker, course, number)| {
                    (worker.to_string(), course.to_string(), *number)
                })
                .collect(),
        });
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enrollment(
        mut self,
        worker: &str,
        course: &str,
        number: i64,
        status: EnrollmentStatus,
        start_days_ago: i64,
        deadline_days_from_now: i64,
        completion_days_ago: Option<i64>,
    ) -> Self {
        self.enrollments.push(TestEnrollment {
            worker: worker.to_string(),
            course: course.to_string(),
            number,
            status,
            start_days_ago,
            deadline_days_from_now,
            completion_days_ago,
        });
        self
    }

    pub async fn build(self) -> Result<TestDb, AppError> {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });

        // One shared connection keeps every query on the same in-memory
        // database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(AppError::from)?;

        let now = Utc::now();

        let mut worker_id_map: HashMap<String, i64> = HashMap::new();
        let mut course_id_map: HashMap<String, i64> = HashMap::new();
        let mut level_id_map: HashMap<(String, i64), i64> = HashMap::new();
        let mut content_id_map: HashMap<String, i64> = HashMap::new();
        let mut question_id_map: HashMap<String, i64> = HashMap::new();
        let mut option_id_map: HashMap<(String, String), i64> = HashMap::new();
        let mut order_ids: Vec<i64> = Vec::new();
        let mut enrollment_id_map: HashMap<(String, String, i64), i64> = HashMap::new();

        for worker in &self.workers {
            let res = sqlx::query(
                "INSERT INTO workers (company_id, full_name, years_experience, created_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(worker.company_id)
            .bind(&worker.name)
            .bind(worker.years_experience)
            .bind(now)
            .execute(&pool)
            .await?;

            worker_id_map.insert(worker.name.clone(), res.last_insert_rowid());
        }

        for course in &self.courses {
            let res = sqlx::query("INSERT INTO courses (name, created_at) VALUES (?, ?)")
                .bind(course)
                .bind(now)
                .execute(&pool)
                .await?;

            course_id_map.insert(course.clone(), res.last_insert_rowid());
        }

        for level in &self.levels {
            let course_id = course_id_map[&level.course];
            let res = sqlx::query(
                "INSERT INTO course_levels
                 (course_id, level_number, fast_track_experience_required, completion_window_days)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(course_id)
            .bind(level.number)
            .bind(level.fast_track_experience_required)
            .bind(level.completion_window_days)
            .execute(&pool)
            .await?;

            level_id_map.insert((level.course.clone(), level.number), res.last_insert_rowid());
        }

        for content in &self.contents {
            let level_id = level_id_map[&(content.course.clone(), content.number)];
            let res = sqlx::query(
                "INSERT INTO content_items
                 (course_level_id, content_type, title, sequence_order, min_watch_percentage,
                  passing_score, retry_threshold, max_attempts_allowed, is_final_exam)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(level_id)
            .bind(content.content_type)
            .bind(&content.title)
            .bind(content.sequence_order)
            .bind(content.min_watch_percentage)
            .bind(content.passing_score)
            .bind(content.retry_threshold)
            .bind(content.max_attempts_allowed)
            .bind(content.is_final_exam)
            .execute(&pool)
            .await?;

            content_id_map.insert(content.title.clone(), res.last_insert_rowid());
        }

        for question in &self.questions {
            let content_id = content_id_map[&question.content_title];
            let res = sqlx::query(
                "INSERT INTO quiz_questions (content_item_id, prompt, points) VALUES (?, ?, ?)",
            )
            .bind(content_id)
            .bind(&question.prompt)
            .bind(question.points)
            .execute(&pool)
            .await?;

            let question_id = res.last_insert_rowid();
            question_id_map.insert(question.prompt.clone(), question_id);

            for (label, is_correct) in &question.options {
                let res = sqlx::query(
                    "INSERT INTO quiz_options (question_id, label, is_correct) VALUES (?, ?, ?)",
                )
                .bind(question_id)
                .bind(label)
                .bind(is_correct)
                .execute(&pool)
                .await?;

                option_id_map.insert(
                    (question.prompt.clone(), label.clone()),
                    res.last_insert_rowid(),
                );
            }
        }

        for order in &self.orders {
            let res = sqlx::query(
                "INSERT INTO orders (company_id, status, created_at) VALUES (?, 'pending', ?)",
            )
            .bind(order.company_id)
            .bind(now)
            .execute(&pool)
            .await?;

            let order_id = res.last_insert_rowid();
            order_ids.push(order_id);

            for (worker, course, number) in &order.items {
                let worker_id = worker_id_map[worker];
                let level_id = level_id_map[&(course.clone(), *number)];
                sqlx::query(
                    "INSERT INTO order_items (order_id, worker_id, course_level_id)
                     VALUES (?, ?, ?)",
                )
                .bind(order_id)
                .bind(worker_id)
                .bind(level_id)
                .execute(&pool)
                .await?;
            }
        }

        for enrollment in &self.enrollments {
            let worker_id = worker_id_map[&enrollment.worker];
            let level_id = level_id_map[&(enrollment.course.clone(), enrollment.number)];
            let start = now - Duration::days(enrollment.start_days_ago);
            let deadline = now + Duration::days(enrollment.deadline_days_from_now);
            let completion = enrollment
                .completion_days_ago
                .map(|days| now - Duration::days(days));

            let res = sqlx::query(
                "INSERT INTO level_enrollments
                 (worker_id, course_level_id, start_date, deadline_date, status, completion_date)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(worker_id)
            .bind(level_id)
            .bind(start)
            .bind(deadline)
            .bind(enrollment.status)
            .bind(completion)
            .execute(&pool)
            .await?;

            enrollment_id_map.insert(
                (
                    enrollment.worker.clone(),
                    enrollment.course.clone(),
                    enrollment.number,
                ),
                res.last_insert_rowid(),
            );
        }

        Ok(TestDb {
            pool,
            worker_id_map,
            level_id_map,
            content_id_map,
            question_id_map,
            option_id_map,
            order_ids,
            enrollment_id_map,
        })
    }
}

pub struct TestDb {
    pub pool: Pool<Sqlite>,
    pub worker_id_map: HashMap<String, i64>,
    pub level_id_map: HashMap<(String, i64), i64>,
    pub content_id_map: HashMap<String, i64>,
    pub question_id_map: HashMap<String, i64>,
    pub option_id_map: HashMap<(String, String), i64>,
    pub order_ids: Vec<i64>,
    pub enrollment_id_map: HashMap<(String, String, i64), i64>,
}

impl TestDb {
    pub fn worker_id(&self, name: &str) -> i64 {
        self.worker_id_map[name]
    }

    pub fn level_id(&self, course: &str, number: i64) -> i64 {
        self.level_id_map[&(course.to_string(), number)]
    }

    pub fn content_id(&self, title: &str) -> i64 {
        self.content_id_map[title]
    }

    pub fn question_id(&self, prompt: &str) -> i64 {
        self.question_id_map[prompt]
    }

    pub fn option_id(&self, prompt: &str, label: &str) -> i64 {
        self.option_id_map[&(prompt.to_string(), label.to_string())]
    }

    pub fn order_id(&self, index: usize) -> i64 {
        self.order_ids[index]
    }

    pub fn enrollment_id(&self, worker: &str, course: &str, number: i64) -> i64 {
        self.enrollment_id_map[&(worker.to_string(), course.to_string(), number)]
    }
}

pub const STANDARD_COURSE: &str = "Working at Heights";
pub const LEVEL_ONE_VIDEO: &str = "Safety Basics Video";
pub const LEVEL_ONE_QUIZ: &str = "Safety Basics Quiz";
pub const QUESTION_ONE: &str = "Which device arrests a fall?";
pub const QUESTION_TWO: &str = "When must anchor points be inspected?";

/// Course with two levels, a video + final-exam quiz in level 1, and two
/// workers: alice (3 years experience) and bob (7 years). Level 2 fast-tracks
/// at 5 years. An order for alice's level 1 sits pending.
pub fn standard_test_db_builder() -> TestDbBuilder {
    TestDbBuilder::new()
        .worker("alice", 1, 3)
        .worker("bob", 1, 7)
        .course(STANDARD_COURSE)
        .level(STANDARD_COURSE, 1, 180)
        .level_with_fast_track(STANDARD_COURSE, 2, 365, 5)
        .video(STANDARD_COURSE, 1, LEVEL_ONE_VIDEO, 1, 90)
        .quiz(
            STANDARD_COURSE,
            1,
            LEVEL_ONE_QUIZ,
            2,
            Some(70),
            Some(40),
            Some(3),
            true,
        )
        .question(
            LEVEL_ONE_QUIZ,
            QUESTION_ONE,
            1,
            &[("A fall arrest harness", true), ("A hard hat", false)],
        )
        .question(
            LEVEL_ONE_QUIZ,
            QUESTION_TWO,
            1,
            &[("Before every use", true), ("Once a year", false)],
        )
        .video(STANDARD_COURSE, 2, "Advanced Rigging Video", 1, 90)
        .quiz(
            STANDARD_COURSE,
            2,
            "Advanced Rigging Quiz",
            2,
            Some(70),
            Some(40),
            Some(3),
            true,
        )
        .order(1, &[("alice", STANDARD_COURSE, 1)])
}

pub async fn create_standard_test_db() -> TestDb {
    standard_test_db_builder()
        .build()
        .await
        .expect("Failed to build test database")
}

pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
    let rocket = crate::init_rocket(test_db.pool.clone()).await;
    let client = Client::tracked(rocket)
        .await
        .expect("Failed to build test client");
    (client, test_db)
}

pub fn identity_headers(worker_id: i64, role: &str) -> Vec<Header<'static>> {
    vec![
        Header::new("X-Worker-Id", worker_id.to_string()),
        Header::new("X-Company-Id", "1"),
        Header::new("X-Role", role.to_string()),
    ]
}
