//! Companies, users, benefit plans and enrollments.
//!
//! Only the inserts that seeding needs are exposed; admin editing lives outside this service.

use sqlx::PgExecutor;
use time::Date;
use uuid::Uuid;

use crate::{
	Result,
	models::{BenefitPlan, Company, EnrollmentView, User},
};

pub struct NewUser<'a> {
	pub user_id: Uuid,
	pub company_id: Option<Uuid>,
	pub email: &'a str,
	pub display_name: &'a str,
	pub role: &'a str,
}

pub struct NewBenefitPlan<'a> {
	pub plan_id: Uuid,
	pub company_id: Uuid,
	pub name: &'a str,
	pub plan_type: &'a str,
	pub description: &'a str,
}

pub async fn insert_company<'e, E>(executor: E, company_id: Uuid, name: &str, slug: &str) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query("INSERT INTO companies (company_id, name, slug) VALUES ($1, $2, $3)")
		.bind(company_id)
		.bind(name)
		.bind(slug)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn insert_user<'e, E>(executor: E, user: &NewUser<'_>) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO users (user_id, company_id, email, display_name, role)
VALUES ($1, $2, $3, $4, $5)",
	)
	.bind(user.user_id)
	.bind(user.company_id)
	.bind(user.email)
	.bind(user.display_name)
	.bind(user.role)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn set_user_active<'e, E>(executor: E, user_id: Uuid, active: bool) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query("UPDATE users SET active = $1 WHERE user_id = $2")
		.bind(active)
		.bind(user_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn insert_benefit_plan<'e, E>(executor: E, plan: &NewBenefitPlan<'_>) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO benefit_plans (plan_id, company_id, name, plan_type, description)
VALUES ($1, $2, $3, $4, $5)",
	)
	.bind(plan.plan_id)
	.bind(plan.company_id)
	.bind(plan.name)
	.bind(plan.plan_type)
	.bind(plan.description)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn insert_enrollment<'e, E>(
	executor: E,
	user_id: Uuid,
	plan_id: Uuid,
	coverage_level: &str,
	effective_date: Option<Date>,
) -> Result<Uuid>
where
	E: PgExecutor<'e>,
{
	let enrollment_id = Uuid::new_v4();

	sqlx::query(
		"\
INSERT INTO enrollments (enrollment_id, user_id, plan_id, coverage_level, effective_date)
VALUES ($1, $2, $3, $4, $5)",
	)
	.bind(enrollment_id)
	.bind(user_id)
	.bind(plan_id)
	.bind(coverage_level)
	.bind(effective_date)
	.execute(executor)
	.await?;

	Ok(enrollment_id)
}

pub async fn get_company<'e, E>(executor: E, company_id: Uuid) -> Result<Option<Company>>
where
	E: PgExecutor<'e>,
{
	let company = sqlx::query_as::<_, Company>(
		"\
SELECT company_id, name, slug, status, created_at, updated_at
FROM companies
WHERE company_id = $1",
	)
	.bind(company_id)
	.fetch_optional(executor)
	.await?;

	Ok(company)
}

pub async fn get_user<'e, E>(executor: E, user_id: Uuid) -> Result<Option<User>>
where
	E: PgExecutor<'e>,
{
	let user = sqlx::query_as::<_, User>(
		"\
SELECT user_id, company_id, email, display_name, role, active, created_at
FROM users
WHERE user_id = $1",
	)
	.bind(user_id)
	.fetch_optional(executor)
	.await?;

	Ok(user)
}

pub async fn list_active_plans<'e, E>(executor: E, company_id: Uuid) -> Result<Vec<BenefitPlan>>
where
	E: PgExecutor<'e>,
{
	let plans = sqlx::query_as::<_, BenefitPlan>(
		"\
SELECT plan_id, company_id, name, plan_type, description, active, created_at
FROM benefit_plans
WHERE company_id = $1 AND active
ORDER BY plan_type, name",
	)
	.bind(company_id)
	.fetch_all(executor)
	.await?;

	Ok(plans)
}

/// Active enrollments of one user, restricted to plans of the given company.
pub async fn list_user_enrollments<'e, E>(
	executor: E,
	company_id: Uuid,
	user_id: Uuid,
) -> Result<Vec<EnrollmentView>>
where
	E: PgExecutor<'e>,
{
	let enrollments = sqlx::query_as::<_, EnrollmentView>(
		"\
SELECT
	e.enrollment_id,
	e.plan_id,
	p.name AS plan_name,
	p.plan_type,
	e.coverage_level,
	e.status,
	e.effective_date
FROM enrollments e
JOIN benefit_plans p ON p.plan_id = e.plan_id
WHERE p.company_id = $1 AND e.user_id = $2 AND e.status = 'active'
ORDER BY p.plan_type, p.name",
	)
	.bind(company_id)
	.bind(user_id)
	.fetch_all(executor)
	.await?;

	Ok(enrollments)
}
