use chrono::DateTime;

use crate::notifier::TIMEZONE;
use crate::upstream::{Day, Dish, MealKind, Nutrients};

pub const NO_MENU_TODAY: &str = "🌱 No menu available for today, enjoy your day";

/// Icon + name for a wire-level meal value. Total: reserved or unknown
/// values render as a plain "Meal" heading.
pub fn meal_heading(meal: u8) -> &'static str {
    match MealKind::from_wire(meal) {
        Some(MealKind::Breakfast) => "🌅 Breakfast",
        Some(MealKind::Lunch) => "🍽️ Lunch",
        Some(MealKind::Dinner) => "🌙 Dinner",
        None => "Meal",
    }
}

fn nutrients_block(nutrients: &Nutrients, label: &str) -> String {
    format!(
        "   • {label}Calories: {:.0} kcal\n   • {label}Protein: {:.1}g\n   • {label}Fat: {:.1}g\n   • {label}Carbs: {:.1}g\n",
        nutrients.kcal, nutrients.prot, nutrients.fat, nutrients.carb
    )
}

/// The scheduled notification for one meal of one user.
pub fn single_meal(kind: MealKind, dish: &Dish) -> String {
    let mut msg = format!("{} time!\n\n", meal_heading(kind.wire()));
    msg += &format!("🍳 {}\n\n", dish.title);

    if !dish.description.is_empty() {
        msg += &format!("ℹ️ {}\n\n", dish.description);
    }

    msg += &format!("⚖️ Weight: {}g\n", dish.weight);
    if dish.is_hot {
        msg += "♨️ Needs heating\n";
    }

    msg += "\n📊 Nutrients:\n";
    msg += &nutrients_block(&dish.nutrients, "");

    msg.trim_end().to_owned()
}

/// The full-day menu returned by the `/menu` command, dishes in upstream
/// order with the daily totals at the bottom.
pub fn day_menu(day: &Day) -> String {
    let date = DateTime::from_timestamp(day.timestamp, 0)
        .unwrap_or_default()
        .with_timezone(&TIMEZONE);

    let mut msg = format!(
        "📅 Menu for {}, {}\n\n",
        date.format("%A"),
        date.format("%d.%m.%Y")
    );

    for dish in &day.dishes {
        msg += &format!("{}:\n", meal_heading(dish.meal));
        msg += &format!("🍳 {}\n", dish.title);

        if !dish.description.is_empty() {
            msg += &format!("ℹ️ {}\n", dish.description);
        }

        msg += &format!("⚖️ Weight: {}g", dish.weight);
        if dish.is_hot {
            msg += " (♨️ Needs heating)";
        }
        msg += "\n";

        msg += "📊 Nutrients:\n";
        msg += &nutrients_block(&dish.nutrients, "");
        msg += "\n";
    }

    msg += "📈 Daily Totals:\n";
    msg += &nutrients_block(&day.nutrients, "Total ");

    msg.trim().to_owned()
}

pub fn welcome() -> String {
    [
        "Welcome! This is a simple bot for checking your ordered menu from nutritionpro.cz.",
        "You can get today's menu by entering your phone number.",
        "Also, you'll receive a notification during the day for each meal individually. You can unsubscribe at any time.",
        "To get started, please enter your Czech phone number in the following format:",
        "• Must start with +420",
        "• Followed by 9 digits",
        "• Example: +420123456789",
    ]
    .join("\n")
}

pub fn help() -> String {
    [
        "Available commands:",
        "/help - Show this help message",
        "/start - Start over and enter a new phone number",
        "/unsubscribe - Remove your phone number from the system",
        "/menu - Get today's menu for your phone number",
    ]
    .join("\n")
}

pub fn invalid_phone() -> String {
    [
        "❌ Invalid phone number format.",
        "Please enter a valid Czech phone number:",
        "• Must start with +420",
        "• Followed by 9 digits",
        "• Example: +420123456789",
    ]
    .join("\n")
}

pub fn phone_saved(phone: &str) -> String {
    [
        format!("✅ Phone number successfully saved: {phone}"),
        "🔔 You will receive notifications for:".to_owned(),
        "• Breakfast at 7:00".to_owned(),
        "• Lunch at 11:00".to_owned(),
        "• Dinner at 17:00".to_owned(),
    ]
    .join("\n")
}

pub fn registration_failed() -> String {
    "✅ Phone number saved, but notifications couldn't be enabled.".to_owned()
}

pub fn menu_unavailable() -> String {
    "Error retrieving today's menu. Please try again later.".to_owned()
}

pub fn no_phone_yet() -> String {
    "Please enter your phone number first using /start.".to_owned()
}

pub fn unsubscribed(removed: bool) -> String {
    if removed {
        "Your phone number has been removed and notifications disabled.".to_owned()
    } else {
        "You don't have any phone number saved in the system.".to_owned()
    }
}

pub fn unknown_command() -> String {
    "Unknown command. Type /help for available commands.".to_owned()
}
