use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Employee,
	HrAdmin,
	CompanyAdmin,
	PlatformAdmin,
}
impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Role::Employee => "employee",
			Role::HrAdmin => "hr_admin",
			Role::CompanyAdmin => "company_admin",
			Role::PlatformAdmin => "platform_admin",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"employee" => Some(Role::Employee),
			"hr_admin" => Some(Role::HrAdmin),
			"company_admin" => Some(Role::CompanyAdmin),
			"platform_admin" => Some(Role::PlatformAdmin),
			_ => None,
		}
	}

	pub fn can_manage_documents(self) -> bool {
		matches!(self, Role::HrAdmin | Role::CompanyAdmin | Role::PlatformAdmin)
	}

	pub fn can_view_analytics(self) -> bool {
		matches!(self, Role::CompanyAdmin | Role::PlatformAdmin)
	}
}

/// The caller, resolved from the user table.
#[derive(Clone, Debug, Serialize)]
pub struct UserContext {
	pub user_id: Uuid,
	/// `None` only for platform admins.
	pub company_id: Option<Uuid>,
	pub role: Role,
	pub email: String,
	pub display_name: String,
}

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum AccessError {
	#[error("{message}")]
	Forbidden { message: String },
	#[error("{message}")]
	InvalidRequest { message: String },
}

/// Resolves which company a request operates on.
pub fn resolve_company_scope(
	user: &UserContext,
	requested: Option<Uuid>,
) -> Result<Uuid, AccessError> {
	if user.role == Role::PlatformAdmin {
		return requested.ok_or_else(|| AccessError::InvalidRequest {
			message: "Platform admins must name a company with X-Benefits-Company-Id.".to_string(),
		});
	}

	let Some(own) = user.company_id else {
		return Err(AccessError::Forbidden {
			message: "User is not assigned to a company.".to_string(),
		});
	};

	match requested {
		Some(other) if other != own => Err(AccessError::Forbidden {
			message: "Access to another company is not allowed.".to_string(),
		}),
		_ => Ok(own),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn user(role: Role, company_id: Option<Uuid>) -> UserContext {
		UserContext {
			user_id: Uuid::new_v4(),
			company_id,
			role,
			email: "user@example.com".to_string(),
			display_name: "User".to_string(),
		}
	}

	#[test]
	fn roles_round_trip_through_strings() {
		for role in [Role::Employee, Role::HrAdmin, Role::CompanyAdmin, Role::PlatformAdmin] {
			assert_eq!(Role::parse(role.as_str()), Some(role));
		}

		assert_eq!(Role::parse("owner"), None);
	}

	#[test]
	fn employees_cannot_manage_documents() {
		assert!(!Role::Employee.can_manage_documents());
		assert!(Role::HrAdmin.can_manage_documents());
		assert!(!Role::HrAdmin.can_view_analytics());
		assert!(Role::CompanyAdmin.can_view_analytics());
	}

	#[test]
	fn members_are_pinned_to_their_company() {
		let company = Uuid::new_v4();
		let employee = user(Role::Employee, Some(company));

		assert_eq!(resolve_company_scope(&employee, None), Ok(company));
		assert_eq!(resolve_company_scope(&employee, Some(company)), Ok(company));
		assert!(matches!(
			resolve_company_scope(&employee, Some(Uuid::new_v4())),
			Err(AccessError::Forbidden { .. })
		));
	}

	#[test]
	fn platform_admins_must_name_a_company() {
		let admin = user(Role::PlatformAdmin, None);
		let company = Uuid::new_v4();

		assert!(matches!(
			resolve_company_scope(&admin, None),
			Err(AccessError::InvalidRequest { .. })
		));
		assert_eq!(resolve_company_scope(&admin, Some(company)), Ok(company));
	}

	#[test]
	fn orphaned_members_are_forbidden() {
		let hr = user(Role::HrAdmin, None);

		assert!(matches!(resolve_company_scope(&hr, None), Err(AccessError::Forbidden { .. })));
	}
}
