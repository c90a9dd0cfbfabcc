//! Route handlers.
//!
//! Deliberately thin: validate the form, call a store, render a page or
//! redirect. Rendering proper (templates, static assets) is an external
//! concern, so the pages here are minimal HTML shells, just enough for the
//! pipeline's behavior to be observable end to end.

use crate::app::App;
use crate::chain::{Request, Response};
use crate::context;
use crate::csrf;
use crate::error::{AppError, StoreError};
use crate::forms::Form;
use crate::respond::{self, escape};
use http::StatusCode;
use std::sync::Arc;

/// Liveness probe. Bypasses the dynamic chain entirely so it stays reachable
/// even if the session or auth subsystem is degraded.
pub async fn ping(_request: Request) -> Response {
    respond::text(StatusCode::OK, "OK")
}

/// `GET /`: list the latest snippets.
pub async fn home(app: Arc<App>, request: Request) -> Response {
    let snippets = match app.snippets.latest(10).await {
        Ok(snippets) => snippets,
        Err(error) => return server_error(error),
    };

    let flash = session_flash(&request);
    let mut items = String::new();
    for snippet in &snippets {
        items.push_str(&format!(
            "<li><a href='/snippet/{}'>{}</a></li>\n",
            snippet.id,
            escape(&snippet.title)
        ));
    }
    let body = format!("{flash}<h2>Latest Snippets</h2>\n<ul>\n{items}</ul>");
    respond::html(StatusCode::OK, page("Home", &body))
}

/// `GET /snippet/:id`: show one snippet.
///
/// A malformed id (negative, decimal, non-numeric, empty, trailing segment)
/// is a 404 like a missing snippet, never a 500 or a validation error.
pub async fn show_snippet(app: Arc<App>, request: Request) -> Response {
    let Some(id) = context::positive_id_param(&request, "id") else {
        return AppError::NotFound.into_response();
    };
    match app.snippets.get(id).await {
        Ok(Some(snippet)) => {
            let body = format!(
                "{}<h2>{}</h2>\n<pre>{}</pre>",
                session_flash(&request),
                escape(&snippet.title),
                escape(&snippet.content)
            );
            respond::html(StatusCode::OK, page(&snippet.title, &body))
        }
        Ok(None) => AppError::NotFound.into_response(),
        Err(error) => server_error(error),
    }
}

/// `GET /snippet/create`: the snippet form. Protected.
pub async fn create_snippet_form(_app: Arc<App>, request: Request) -> Response {
    render_snippet_form(&request, &Form::default(), StatusCode::OK)
}

/// `POST /snippet/create`: create a snippet. Protected.
pub async fn create_snippet(app: Arc<App>, request: Request) -> Response {
    let mut form = Form::parse(request.body());
    form.required("title")
        .max_length("title", 100)
        .required("content");
    if !form.valid() {
        return render_snippet_form(&request, &form, StatusCode::UNPROCESSABLE_ENTITY);
    }

    let Some(user) = context::current_user(&request) else {
        // The require-authentication gate runs before this handler.
        return respond::see_other(crate::middleware::LOGIN_PATH);
    };
    match app
        .snippets
        .insert(form.get("title"), form.get("content"), user.id)
        .await
    {
        Ok(id) => {
            set_flash(&request, "Snippet successfully created!");
            respond::see_other(&format!("/snippet/{id}"))
        }
        Err(error) => server_error(error),
    }
}

/// `GET /user/signup`: the signup form.
pub async fn signup_form(_app: Arc<App>, request: Request) -> Response {
    render_signup_form(&request, &Form::default(), StatusCode::OK)
}

/// `POST /user/signup`: register an account.
pub async fn signup(app: Arc<App>, request: Request) -> Response {
    let mut form = Form::parse(request.body());
    form.required("name")
        .required("email")
        .looks_like_email("email")
        .required("password")
        .min_length("password", 10);
    if !form.valid() {
        return render_signup_form(&request, &form, StatusCode::UNPROCESSABLE_ENTITY);
    }

    match app
        .users
        .insert(form.get("name"), form.get("email"), form.get("password"))
        .await
    {
        Ok(_) => {
            set_flash(&request, "Your signup was successful. Please log in.");
            respond::see_other(crate::middleware::LOGIN_PATH)
        }
        Err(StoreError::DuplicateEmail) => {
            form.errors
                .insert("email", "Address is already in use".to_string());
            render_signup_form(&request, &form, StatusCode::UNPROCESSABLE_ENTITY)
        }
        Err(error) => server_error(error),
    }
}

/// `GET /user/login`: the login form.
pub async fn login_form(_app: Arc<App>, request: Request) -> Response {
    render_login_form(&request, &Form::default(), StatusCode::OK)
}

/// `POST /user/login`: authenticate and bind the session to the user.
///
/// On success the session id is renewed before the user id is stored, so a
/// session identifier fixed before login never carries the authenticated
/// privileges.
pub async fn login(app: Arc<App>, request: Request) -> Response {
    let mut form = Form::parse(request.body());
    match app
        .users
        .authenticate(form.get("email"), form.get("password"))
        .await
    {
        Ok(Some(user_id)) => {
            if let Some(session) = context::session(&request) {
                session.with(|session| {
                    session.renew();
                    session.data_mut().user_id = Some(user_id);
                });
            }
            respond::see_other("/snippet/create")
        }
        Ok(None) => {
            form.errors
                .insert("generic", "Email or Password is incorrect".to_string());
            render_login_form(&request, &form, StatusCode::UNPROCESSABLE_ENTITY)
        }
        Err(error) => server_error(error),
    }
}

/// `POST /user/logout`: destroy the session. Protected.
pub async fn logout(_app: Arc<App>, request: Request) -> Response {
    if let Some(session) = context::session(&request) {
        session.with(|session| session.delete());
    }
    respond::see_other("/")
}

/// `GET /user/profile`: the signed-in account's details. Protected.
pub async fn profile(_app: Arc<App>, request: Request) -> Response {
    let Some(user) = context::current_user(&request) else {
        // The require-authentication gate runs before this handler.
        return respond::see_other(crate::middleware::LOGIN_PATH);
    };
    let body = format!(
        "<h2>Your Profile</h2>\n<dl>\n<dt>Name</dt><dd>{}</dd>\n\
         <dt>Email</dt><dd>{}</dd>\n</dl>",
        escape(&user.name),
        escape(&user.email)
    );
    respond::html(StatusCode::OK, page("Your Profile", &body))
}

/// `GET /about`: static information page.
pub async fn about(_app: Arc<App>, request: Request) -> Response {
    let body = format!(
        "{}<h2>About</h2>\n<p>Snipbin is a place to publish and share text snippets.</p>",
        session_flash(&request)
    );
    respond::html(StatusCode::OK, page("About", &body))
}

fn server_error(error: StoreError) -> Response {
    AppError::Internal(error.into()).into_response()
}

fn session_flash(request: &Request) -> String {
    let flash = context::session(request)
        .and_then(|session| session.with(|session| session.take_flash()));
    match flash {
        Some(flash) => format!("<div class='flash'>{}</div>\n", escape(&flash)),
        None => String::new(),
    }
}

fn set_flash(request: &Request, message: &str) {
    if let Some(session) = context::session(request) {
        session.with(|session| session.data_mut().flash = Some(message.to_string()));
    }
}

fn csrf_field(request: &Request) -> String {
    let token = context::session(request)
        .map(|session| session.with(csrf::issue))
        .unwrap_or_default();
    format!("<input type='hidden' name='csrf_token' value='{token}'>")
}

fn field_error(form: &Form, field: &str) -> String {
    match form.errors.get(field) {
        Some(message) => format!("<label class='error'>{}</label>", escape(message)),
        None => String::new(),
    }
}

fn render_snippet_form(request: &Request, form: &Form, status: StatusCode) -> Response {
    let body = format!(
        "<h2>Create Snippet</h2>\n<form action='/snippet/create' method='POST'>\n{}\n\
         {}<input type='text' name='title' value='{}'>\n\
         {}<textarea name='content'>{}</textarea>\n\
         <input type='submit' value='Publish'>\n</form>",
        csrf_field(request),
        field_error(form, "title"),
        escape(form.get("title")),
        field_error(form, "content"),
        escape(form.get("content")),
    );
    respond::html(status, page("Create Snippet", &body))
}

fn render_signup_form(request: &Request, form: &Form, status: StatusCode) -> Response {
    let body = format!(
        "<h2>Signup</h2>\n<form action='/user/signup' method='POST'>\n{}\n\
         {}<input type='text' name='name' value='{}'>\n\
         {}<input type='email' name='email' value='{}'>\n\
         {}<input type='password' name='password'>\n\
         <input type='submit' value='Signup'>\n</form>",
        csrf_field(request),
        field_error(form, "name"),
        escape(form.get("name")),
        field_error(form, "email"),
        escape(form.get("email")),
        field_error(form, "password"),
    );
    respond::html(status, page("Signup", &body))
}

fn render_login_form(request: &Request, form: &Form, status: StatusCode) -> Response {
    let body = format!(
        "{}<h2>Login</h2>\n<form action='/user/login' method='POST'>\n{}\n{}\n\
         <input type='email' name='email' value='{}'>\n\
         <input type='password' name='password'>\n\
         <input type='submit' value='Login'>\n</form>",
        session_flash(request),
        csrf_field(request),
        field_error(form, "generic"),
        escape(form.get("email")),
    );
    respond::html(status, page("Login", &body))
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html lang='en'>\n<head><title>{} - Snipbin</title></head>\n\
         <body>\n<header><h1><a href='/'>Snipbin</a></h1></header>\n\
         <main>\n{body}\n</main>\n</body>\n</html>",
        escape(title)
    )
}
