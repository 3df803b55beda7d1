use crate::api::Backend;
use crate::services::auth_form::{self, AuthField, AuthForm, AuthMode, AuthRequest};
use adw::prelude::*;
use gtk4 as gtk;
use std::cell::RefCell;
use std::rc::Rc;

struct FormEntries {
    identifier: gtk::Entry,
    email: gtk::Entry,
    username: gtk::Entry,
    password: gtk::PasswordEntry,
}

impl FormEntries {
    fn entry(&self, field: AuthField) -> gtk::Widget {
        match field {
            AuthField::Identifier => self.identifier.clone().upcast(),
            AuthField::Email => self.email.clone().upcast(),
            AuthField::Username => self.username.clone().upcast(),
            AuthField::Password => self.password.clone().upcast(),
        }
    }

    fn read_into(&self, form: &mut AuthForm) {
        form.set(AuthField::Identifier, &self.identifier.text());
        form.set(AuthField::Email, &self.email.text());
        form.set(AuthField::Username, &self.username.text());
        form.set(AuthField::Password, &self.password.text());
    }

    fn show(&self, form: &AuthForm) {
        self.identifier.set_text(form.get(AuthField::Identifier));
        self.email.set_text(form.get(AuthField::Email));
        self.username.set_text(form.get(AuthField::Username));
        self.password.set_text(form.get(AuthField::Password));
        for field in [
            AuthField::Identifier,
            AuthField::Email,
            AuthField::Username,
            AuthField::Password,
        ] {
            self.entry(field)
                .set_visible(form.visible_fields().contains(&field));
        }
    }
}

fn labels(mode: AuthMode) -> (&'static str, &'static str, &'static str) {
    match mode {
        AuthMode::Login => ("Login", "Log in", "Need an account? Sign up"),
        AuthMode::SignUp => ("Sign Up", "Create account", "Have an account? Log in"),
    }
}

/// Login / sign-up form. The session gate replaces it once auth succeeds.
pub fn build_login_page(backend: &Backend) -> gtk::Widget {
    let toast_overlay = adw::ToastOverlay::new();

    // Root container
    let root = gtk::Box::new(gtk::Orientation::Vertical, 12);
    root.set_margin_top(24);
    root.set_margin_bottom(24);
    root.set_margin_start(24);
    root.set_margin_end(24);
    root.set_valign(gtk::Align::Center);
    root.set_halign(gtk::Align::Center);
    root.set_width_request(360);

    let title = gtk::Label::new(None);
    title.add_css_class("title-2");
    title.set_halign(gtk::Align::Start);
    root.append(&title);

    let fields = Rc::new(FormEntries {
        identifier: gtk::Entry::new(),
        email: gtk::Entry::new(),
        username: gtk::Entry::new(),
        password: gtk::PasswordEntry::new(),
    });
    fields.identifier.set_placeholder_text(Some("Username or email"));
    fields.email.set_placeholder_text(Some("Email"));
    fields.username.set_placeholder_text(Some("Username"));
    fields.password.set_placeholder_text(Some("Password"));
    fields.password.set_show_peek_icon(true);

    let form_box = gtk::Box::new(gtk::Orientation::Vertical, 8);
    form_box.append(&fields.identifier);
    form_box.append(&fields.email);
    form_box.append(&fields.username);
    form_box.append(&fields.password);
    root.append(&form_box);

    // Status label (small, muted)
    let status = gtk::Label::new(None);
    status.add_css_class("dim-label");
    status.set_halign(gtk::Align::Start);
    root.append(&status);

    let submit_btn = gtk::Button::new();
    submit_btn.add_css_class("suggested-action");
    submit_btn.set_halign(gtk::Align::End);
    root.append(&submit_btn);

    let toggle_btn = gtk::Button::new();
    toggle_btn.add_css_class("flat");
    root.append(&toggle_btn);

    toast_overlay.set_child(Some(&root));
    let container = gtk::Box::new(gtk::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    let header_title = gtk::Label::new(Some("Firechat"));
    header.set_title_widget(Some(&header_title));
    container.append(&header);
    container.append(&toast_overlay);

    let form = Rc::new(RefCell::new(AuthForm::new()));
    let refresh = {
        let fields = fields.clone();
        let title = title.clone();
        let submit_btn = submit_btn.clone();
        let toggle_btn = toggle_btn.clone();
        move |form: &AuthForm| {
            let (heading, submit, toggle) = labels(form.mode());
            title.set_label(heading);
            submit_btn.set_label(submit);
            toggle_btn.set_label(toggle);
            fields.show(form);
        }
    };
    refresh(&*form.borrow());

    {
        let form = form.clone();
        let fields = fields.clone();
        let status = status.clone();
        toggle_btn.connect_clicked(move |_| {
            let mut form = form.borrow_mut();
            fields.read_into(&mut *form);
            form.toggle();
            status.set_label("");
            refresh(&*form);
        });
    }

    let on_submit = {
        let backend = backend.clone();
        let overlay = toast_overlay.clone();
        let fields = fields.clone();
        let status = status.clone();
        let submit_btn = submit_btn.clone();
        move || {
            let request = {
                let mut form = form.borrow_mut();
                fields.read_into(&mut *form);
                form.validate()
            };
            let request = match request {
                Ok(request) => request,
                Err(err) => {
                    overlay.add_toast(adw::Toast::new(&err.to_string()));
                    return;
                }
            };
            let signing_up = matches!(request, AuthRequest::SignUp { .. });
            status.set_label(if signing_up { "Creating account…" } else { "Signing in…" });
            submit_btn.set_sensitive(false);

            let backend = backend.clone();
            let rx = crate::utils::run_async_to_main(async move {
                auth_form::submit(&backend, request).await
            });
            let status = status.clone();
            let overlay = overlay.clone();
            let submit_btn = submit_btn.clone();
            rx.attach(None, move |res| {
                submit_btn.set_sensitive(true);
                match res {
                    Ok(user) => {
                        log::info!("authenticated {}", user.uid);
                        status.set_label(if signing_up {
                            "User registered successfully!"
                        } else {
                            "Signed in"
                        });
                    }
                    Err(err) => {
                        log::warn!("authentication failed: {err}");
                        status.set_label("");
                        overlay.add_toast(adw::Toast::new(&err.to_string()));
                    }
                }
                glib::ControlFlow::Break
            });
        }
    };

    let on_submit: Rc<dyn Fn()> = Rc::new(on_submit);
    {
        let on_submit = on_submit.clone();
        submit_btn.connect_clicked(move |_| (on_submit)());
    }
    // Enter in any field submits
    {
        let on_submit = on_submit.clone();
        fields.identifier.connect_activate(move |_| (on_submit)());
    }
    {
        let on_submit = on_submit.clone();
        fields.email.connect_activate(move |_| (on_submit)());
    }
    {
        let on_submit = on_submit.clone();
        fields.username.connect_activate(move |_| (on_submit)());
    }
    {
        let on_submit = on_submit.clone();
        fields.password.connect_activate(move |_| (on_submit)());
    }

    container.upcast()
}
