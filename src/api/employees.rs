//! Employee API endpoints. Every route requires a valid access token.
//!
//! - GET `/employees` - List employees (any authenticated user)
//! - POST `/employees` - Create an employee (Admin or Editor)
//! - GET `/employees/{id}` - Fetch one employee (any authenticated user)
//! - PUT `/employees/{id}` - Update names (Admin or Editor)
//! - DELETE `/employees/{id}` - Remove an employee (Admin)
//!
//! An unknown id answers `204 No Content`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::{ApiError, ResultExt, require_field, validate_uuid};
use crate::auth::{AdminOnly, Authorized, CurrentUser, EditorOrAdmin, require_access_token};
use crate::jwt::JwtConfig;
use crate::store::{Employee, EmployeeStore};

#[derive(Clone)]
pub struct EmployeesState {
    pub employees: Arc<dyn EmployeeStore>,
}

pub fn router(state: EmployeesState, jwt: Arc<JwtConfig>) -> Router {
    Router::new()
        .route("/employees", get(list_employees).post(create_employee))
        .route(
            "/employees/{id}",
            get(get_employee)
                .put(update_employee)
                .delete(delete_employee),
        )
        .route_layer(middleware::from_fn_with_state(jwt, require_access_token))
        .with_state(state)
}

#[derive(Deserialize)]
struct EmployeeBody {
    firstname: Option<String>,
    lastname: Option<String>,
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

async fn list_employees(
    State(state): State<EmployeesState>,
    CurrentUser(_user): CurrentUser,
) -> Result<Json<Vec<Employee>>, ApiError> {
    let employees = state
        .employees
        .list()
        .await
        .store_err("Failed to list employees")?;
    Ok(Json(employees))
}

async fn get_employee(
    State(state): State<EmployeesState>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    validate_uuid(&id)?;

    let employee = state
        .employees
        .get(&id)
        .await
        .store_err("Failed to get employee")?;

    Ok(match employee {
        Some(employee) => Json(employee).into_response(),
        None => no_content(),
    })
}

async fn create_employee(
    State(state): State<EmployeesState>,
    auth: Authorized<EditorOrAdmin>,
    body: Result<Json<EmployeeBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) =
        body.map_err(|_| ApiError::bad_request("First and last names are required."))?;
    let firstname = require_field(&body.firstname, "First name")?;
    let lastname = require_field(&body.lastname, "Last name")?;

    let employee = Employee::new(firstname, lastname);
    state
        .employees
        .insert(&employee)
        .await
        .store_err("Failed to create employee")?;

    info!(id = %employee.id, by = %auth.user.username, "Employee created");
    Ok((StatusCode::CREATED, Json(employee)))
}

async fn update_employee(
    State(state): State<EmployeesState>,
    auth: Authorized<EditorOrAdmin>,
    Path(id): Path<String>,
    body: Result<Json<EmployeeBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    validate_uuid(&id)?;
    let Json(body) = body.map_err(|_| ApiError::bad_request("Invalid employee body"))?;

    let Some(mut employee) = state
        .employees
        .get(&id)
        .await
        .store_err("Failed to get employee")?
    else {
        return Ok(no_content());
    };

    if let Ok(firstname) = require_field(&body.firstname, "First name") {
        employee.firstname = firstname.to_string();
    }
    if let Ok(lastname) = require_field(&body.lastname, "Last name") {
        employee.lastname = lastname.to_string();
    }

    let updated = state
        .employees
        .update(&employee)
        .await
        .store_err("Failed to update employee")?;
    if !updated {
        // Deleted between the read and the write.
        return Ok(no_content());
    }

    info!(id = %employee.id, by = %auth.user.username, "Employee updated");
    Ok(Json(employee).into_response())
}

async fn delete_employee(
    State(state): State<EmployeesState>,
    auth: Authorized<AdminOnly>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    validate_uuid(&id)?;

    let deleted = state
        .employees
        .delete(&id)
        .await
        .store_err("Failed to delete employee")?;
    if !deleted {
        return Ok(no_content());
    }

    info!(id = %id, by = %auth.user.username, "Employee deleted");
    Ok(Json(DeleteResponse { deleted: true }).into_response())
}
