use crate::api::Backend;
use crate::api::models::AuthUser;
use crate::services::feed::{MessageBubble, MessageFeed};
use gtk4 as gtk;
use gtk4::prelude::*;
use std::rc::Rc;

/// One open conversation. Dropping the view ends its live query.
pub struct ChatView {
    root: gtk::Box,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ChatView {
    pub fn new(
        backend: &Backend,
        me: AuthUser,
        chat_id: &str,
        title: &str,
        overlay: &adw::ToastOverlay,
    ) -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 6);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);

        let heading = gtk::Label::new(Some(if title.is_empty() { "Chat" } else { title }));
        heading.add_css_class("title-3");
        heading.set_halign(gtk::Align::Start);
        root.append(&heading);

        let feed = match MessageFeed::open(backend.store.clone(), me, chat_id) {
            Ok(feed) => feed,
            Err(e) => {
                let lbl = gtk::Label::new(Some(&format!("Chat unavailable: {e}")));
                lbl.add_css_class("dim-label");
                lbl.set_vexpand(true);
                root.append(&lbl);
                return Self { root, task: None };
            }
        };
        let composer = feed.composer();

        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .hexpand(true)
            .build();
        let messages_box = gtk::Box::new(gtk::Orientation::Vertical, 6);
        scroller.set_child(Some(&messages_box));
        root.append(&scroller);

        // Input row
        let input_row = gtk::Box::new(gtk::Orientation::Horizontal, 6);
        let entry = gtk::Entry::new();
        entry.set_hexpand(true);
        entry.set_placeholder_text(Some(&format!(
            "Message {}",
            if title.is_empty() { "Chat" } else { title }
        )));
        let send_btn = gtk::Button::with_label("Send");
        input_row.append(&entry);
        input_row.append(&send_btn);
        root.append(&input_row);

        let (tx, rx) = crate::utils::glib_channel();
        let mut feed = feed;
        let task = crate::utils::spawn_async(async move {
            while let Some(update) = feed.next().await {
                if tx.send(update).is_err() {
                    break;
                }
            }
        });

        {
            let overlay = overlay.clone();
            let messages_box = messages_box.clone();
            let scroller = scroller.clone();
            rx.attach(None, move |update| {
                match update {
                    Ok(bubbles) => render_bubbles(&messages_box, &scroller, &bubbles),
                    Err(err) => overlay.add_toast(adw::Toast::new(&err.to_string())),
                }
                glib::ControlFlow::Continue
            });
        }

        // Send actions
        {
            let entry_for_send = entry.clone();
            let overlay = overlay.clone();
            let send: Rc<dyn Fn()> = Rc::new(move || {
                let text = entry_for_send.text().to_string();
                let mut composer = composer.clone();
                composer.set_draft(&text);
                let rx = crate::utils::run_async_to_main(async move { composer.send().await });
                let entry = entry_for_send.clone();
                let overlay = overlay.clone();
                rx.attach(None, move |res| {
                    match res {
                        // Only clear what was sent; newer typing stays.
                        Ok(Some(_)) if entry.text().as_str() == text => entry.set_text(""),
                        Ok(_) => {}
                        Err(err) => {
                            log::warn!("send failed: {err}");
                            overlay.add_toast(adw::Toast::new(&err.to_string()));
                        }
                    }
                    glib::ControlFlow::Break
                });
            });
            {
                let send = send.clone();
                send_btn.connect_clicked(move |_| (send)());
            }
            {
                let send = send.clone();
                entry.connect_activate(move |_| (send)());
            }
        }

        Self {
            root,
            task: Some(task),
        }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn render_bubbles(messages_box: &gtk::Box, scroller: &gtk::ScrolledWindow, bubbles: &[MessageBubble]) {
    while let Some(child) = messages_box.first_child() {
        messages_box.remove(&child);
    }
    for bubble in bubbles {
        let lbl = gtk::Label::new(Some(&bubble.text));
        lbl.set_wrap(true);
        lbl.set_selectable(true);
        lbl.set_tooltip_text(Some(&crate::utils::short_time(bubble.timestamp)));
        if bubble.outgoing {
            lbl.set_halign(gtk::Align::End);
            lbl.add_css_class("accent");
        } else {
            lbl.set_halign(gtk::Align::Start);
        }
        messages_box.append(&lbl);
    }
    let adj = scroller.vadjustment();
    adj.set_value(adj.upper());
}
