use crate::api::Backend;
use crate::api::models::UserProfile;
use crate::services::search::search_users;
use adw::prelude::*;
use gtk4 as gtk;
use std::cell::RefCell;
use std::rc::Rc;

/// "New chat" dialog: prefix search over users, calling `on_pick` with the
/// chosen profile.
pub fn show_search_dialog<F>(parent: &adw::ApplicationWindow, backend: &Backend, on_pick: F)
where
    F: Fn(UserProfile) + 'static,
{
    let dialog = gtk::Dialog::builder()
        .title("Start New Chat")
        .transient_for(parent)
        .modal(true)
        .default_width(360)
        .default_height(420)
        .build();
    let content = gtk::Box::new(gtk::Orientation::Vertical, 12);
    content.set_margin_top(12);
    content.set_margin_bottom(12);
    content.set_margin_start(12);
    content.set_margin_end(12);

    let row = gtk::Box::new(gtk::Orientation::Horizontal, 6);
    let entry = gtk::Entry::new();
    entry.set_placeholder_text(Some("Search by username or email"));
    entry.set_hexpand(true);
    let search_btn = gtk::Button::with_label("Search");
    row.append(&entry);
    row.append(&search_btn);
    content.append(&row);

    let status = gtk::Label::new(None);
    status.add_css_class("dim-label");
    status.set_halign(gtk::Align::Start);
    content.append(&status);

    let results = gtk::ListBox::new();
    let scroller = gtk::ScrolledWindow::builder()
        .vexpand(true)
        .child(&results)
        .build();
    content.append(&scroller);

    dialog.set_child(Some(&content));
    let _ = dialog.add_button("Cancel", gtk::ResponseType::Cancel);
    dialog.connect_response(|dlg, _| dlg.close());

    let found: Rc<RefCell<Vec<UserProfile>>> = Rc::new(RefCell::new(Vec::new()));

    let on_search = {
        let backend = backend.clone();
        let entry = entry.clone();
        let results = results.clone();
        let status = status.clone();
        let found = found.clone();
        move || {
            let input = entry.text().to_string();
            if input.trim().is_empty() {
                return;
            }
            status.set_label("Searching…");
            let store = backend.store.clone();
            let rx = crate::utils::run_async_to_main(async move {
                search_users(store.as_ref(), &input).await
            });
            let results = results.clone();
            let status = status.clone();
            let found = found.clone();
            rx.attach(None, move |res| {
                while let Some(child) = results.first_child() {
                    results.remove(&child);
                }
                match res {
                    Ok(users) => {
                        status.set_label(&format!("{} found", users.len()));
                        for user in &users {
                            let label = if user.username.is_empty() {
                                user.email.clone()
                            } else {
                                format!("{} ({})", user.username, user.email)
                            };
                            let lbl = gtk::Label::new(Some(&label));
                            lbl.set_halign(gtk::Align::Start);
                            lbl.set_margin_top(8);
                            lbl.set_margin_bottom(8);
                            lbl.set_margin_start(8);
                            results.append(&lbl);
                        }
                        *found.borrow_mut() = users;
                    }
                    Err(err) => {
                        log::error!("Error searching users: {err}");
                        status.set_label(&err.to_string());
                        found.borrow_mut().clear();
                    }
                }
                glib::ControlFlow::Break
            });
        }
    };
    let on_search: Rc<dyn Fn()> = Rc::new(on_search);
    {
        let on_search = on_search.clone();
        search_btn.connect_clicked(move |_| (on_search)());
    }
    {
        let on_search = on_search.clone();
        entry.connect_activate(move |_| (on_search)());
    }

    {
        let dialog = dialog.clone();
        results.connect_row_activated(move |_, row| {
            let picked = usize::try_from(row.index())
                .ok()
                .and_then(|idx| found.borrow().get(idx).cloned());
            if let Some(user) = picked {
                on_pick(user);
                dialog.close();
            }
        });
    }

    dialog.present();
}
