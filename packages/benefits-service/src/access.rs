use uuid::Uuid;

use crate::{BenefitsService, Error, Result};
use benefits_domain::access::{self, Role, UserContext};
use benefits_storage::tenancy;

impl BenefitsService {
	/// Loads the caller. Unknown, deactivated or malformed users are unauthenticated.
	pub async fn resolve_user(&self, user_id: Uuid) -> Result<UserContext> {
		let Some(user) = tenancy::get_user(&self.db.pool, user_id).await? else {
			return Err(Error::Unauthenticated { message: "Unknown user.".to_string() });
		};

		if !user.active {
			return Err(Error::Unauthenticated { message: "User is deactivated.".to_string() });
		}

		let Some(role) = Role::parse(&user.role) else {
			tracing::warn!(user_id = %user.user_id, role = %user.role, "User has an unknown role.");

			return Err(Error::Unauthenticated { message: "User role is not recognized.".to_string() });
		};

		if role != Role::PlatformAdmin && user.company_id.is_none() {
			return Err(Error::Unauthenticated {
				message: "User is not assigned to a company.".to_string(),
			});
		}

		Ok(UserContext {
			user_id: user.user_id,
			company_id: user.company_id,
			role,
			email: user.email,
			display_name: user.display_name,
		})
	}
}

pub(crate) fn company_scope(user: &UserContext, requested: Option<Uuid>) -> Result<Uuid> {
	Ok(access::resolve_company_scope(user, requested)?)
}

/// The caller's own company. Chat and conversations never cross tenants, even for platform admins.
pub(crate) fn own_company(user: &UserContext) -> Result<Uuid> {
	user.company_id.ok_or_else(|| Error::Forbidden {
		message: "Chat requires a user assigned to a company.".to_string(),
	})
}

pub(crate) fn require_document_manager(user: &UserContext) -> Result<()> {
	if user.role.can_manage_documents() {
		return Ok(());
	}

	Err(Error::Forbidden { message: "Role cannot manage documents.".to_string() })
}

pub(crate) fn require_analytics_viewer(user: &UserContext) -> Result<()> {
	if user.role.can_view_analytics() {
		return Ok(());
	}

	Err(Error::Forbidden { message: "Role cannot view analytics.".to_string() })
}

#[cfg(test)]
mod tests {
	use super::*;

	fn user(role: Role, company_id: Option<Uuid>) -> UserContext {
		UserContext {
			user_id: Uuid::new_v4(),
			company_id,
			role,
			email: "a@b.test".to_string(),
			display_name: "A".to_string(),
		}
	}

	#[test]
	fn employees_cannot_manage_documents_or_view_analytics() {
		let employee = user(Role::Employee, Some(Uuid::new_v4()));

		assert!(matches!(require_document_manager(&employee), Err(Error::Forbidden { .. })));
		assert!(matches!(require_analytics_viewer(&employee), Err(Error::Forbidden { .. })));
	}

	#[test]
	fn hr_admins_manage_documents_only() {
		let hr = user(Role::HrAdmin, Some(Uuid::new_v4()));

		assert!(require_document_manager(&hr).is_ok());
		assert!(require_analytics_viewer(&hr).is_err());
	}

	#[test]
	fn platform_admins_have_no_own_company() {
		let admin = user(Role::PlatformAdmin, None);

		assert!(matches!(own_company(&admin), Err(Error::Forbidden { .. })));
		assert!(matches!(company_scope(&admin, None), Err(Error::InvalidRequest { .. })));

		let target = Uuid::new_v4();

		assert_eq!(company_scope(&admin, Some(target)).expect("scope"), target);
	}
}
